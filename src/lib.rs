//! Protocol-client core of a small-web browser.
//!
//! Speaks Gemini, Gopher, Finger and plain HTTP(S), resolves `file://`
//! and `about:` locally, and drives it all through a per-tab
//! navigation controller ([`tab::Tab`]) that turns a URL into exactly
//! one outcome: a response body tagged with a MIME type, or a
//! well-typed error. Rendering, chrome and persistence belong to the
//! embedding shell.

pub mod client;
pub mod config;
pub mod favourites;
pub mod history;
pub mod identity;
pub mod render;
pub mod scheme;
pub mod tab;
