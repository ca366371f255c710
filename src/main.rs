use std::cell::RefCell;
use std::io::{self, BufRead, Write};
use std::path::PathBuf;
use std::rc::Rc;

use anyhow::{bail, Result};
use url::Url;

use beryl::config::Config;
use beryl::favourites::Favourites;
use beryl::identity::CryptoIdentity;
use beryl::scheme::SchemeRegistry;
use beryl::tab::{HistoryMode, Preferences, Tab, TabEvent};

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_writer(io::stderr)
        .init();

    let mut args = std::env::args().skip(1);
    let target = args.next();
    let config = match args.next() {
        Some(path) => Config::load(&PathBuf::from(path))?,
        None => Config::default(),
    };
    let url = match target {
        Some(target) => parse_target(&target)?,
        None => Url::parse(&config.start_page)?,
    };

    let registry = Rc::new(RefCell::new(SchemeRegistry::new(&config.protocols)));
    let favourites = Rc::new(RefCell::new(Favourites::new()));
    let prefs = Preferences {
        text_display: config.text_display,
        use_os_scheme_handler: config.use_os_scheme_handler,
    };
    let mut tab = Tab::new(registry, favourites, prefs);

    let mut queue = tab.navigate_to(url, HistoryMode::PushImmediate);
    let mut loaded = false;
    loop {
        let mut followups = Vec::new();
        for event in queue {
            match event {
                TabEvent::AskInput { prompt } => {
                    eprintln!("{prompt}");
                    followups.extend(tab.provide_input(read_line()?));
                }
                TabEvent::PickIdentity { prompt, .. } => {
                    if !prompt.is_empty() {
                        eprintln!("{prompt}");
                    }
                    followups.extend(tab.provide_identity(load_identity(&config)));
                }
                TabEvent::ConfirmDisableIdentity => {
                    followups.extend(tab.confirm_disable_identity(true));
                }
                TabEvent::Warning(message) => {
                    eprintln!("{message}");
                }
                TabEvent::OpenExternal(url) => {
                    eprintln!("not opening external URL: {url}");
                }
                TabEvent::TitleChanged(_) | TabEvent::LocationChanged(_) => {}
                TabEvent::Progress {
                    transferred,
                    elapsed,
                } => {
                    tracing::debug!(transferred, ?elapsed, "loading");
                }
                TabEvent::FileLoaded {
                    size,
                    mime,
                    elapsed,
                } => {
                    eprintln!("loaded {size} bytes of {mime} in {}ms", elapsed.as_millis());
                    loaded = true;
                }
            }
        }
        if loaded {
            break;
        }
        if followups.is_empty() && !tab.is_in_flight() && !tab.has_pending_prompt() {
            bail!("navigation produced no response");
        }
        queue = followups;
        queue.extend(tab.poll());
    }

    let stdout = io::stdout();
    let mut out = stdout.lock();
    match tab.placeholder_document() {
        Some(notice) => out.write_all(notice.as_bytes())?,
        None => out.write_all(tab.current_buffer())?,
    }
    out.flush()?;

    if !tab.successfully_loaded() {
        std::process::exit(1);
    }
    Ok(())
}

/// Bare input without a scheme is retried as a gemini URL.
fn parse_target(target: &str) -> Result<Url> {
    match Url::parse(target) {
        Ok(url) => Ok(url),
        Err(url::ParseError::RelativeUrlWithoutBase) => {
            Ok(Url::parse(&format!("gemini://{target}"))?)
        }
        Err(e) => bail!("invalid URL {target}: {e}"),
    }
}

fn read_line() -> Result<Option<String>> {
    let mut line = String::new();
    let read = io::stdin().lock().read_line(&mut line)?;
    if read == 0 {
        return Ok(None);
    }
    Ok(Some(line.trim_end_matches(['\r', '\n']).to_string()))
}

/// The identity configured on disk, if any. Declining is just `None`.
fn load_identity(config: &Config) -> Option<CryptoIdentity> {
    let cert_file = config.cert_file.as_ref()?;
    let key_file = config.key_file.as_ref()?;
    match CryptoIdentity::from_pem_files(cert_file, key_file, true, "configured".to_string()) {
        Ok(identity) => Some(identity),
        Err(e) => {
            tracing::warn!(%e, "could not load the configured identity");
            None
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn bare_input_defaults_to_gemini() {
        let url = parse_target("example.com/page").unwrap();
        assert_eq!(url.scheme(), "gemini");
        assert_eq!(url.host_str(), Some("example.com"));

        let url = parse_target("https://example.com/").unwrap();
        assert_eq!(url.scheme(), "https");
    }
}
