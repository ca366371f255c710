use std::cell::RefCell;
use std::rc::Rc;
use std::time::{Duration, Instant};

use url::Url;

use crate::client::finger::FingerClient;
use crate::client::gemini::GeminiClient;
use crate::client::gopher::GopherClient;
use crate::client::local;
use crate::client::web::WebClient;
use crate::client::{
    CertificateRejection, CertificateScope, ClientEvent, PermanentFailure, TemporaryFailure,
};
use crate::config::TextDisplay;
use crate::favourites::Favourites;
use crate::history::History;
use crate::identity::CryptoIdentity;
use crate::render::{self, RendererKind};
use crate::scheme::{SchemeRegistry, SchemeSupport};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HistoryMode {
    DontPush,
    PushImmediate,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClientKind {
    Gemini,
    Gopher,
    Finger,
    Web,
}

/// Which client currently owns the wire. There is never more than one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
enum ActiveClient {
    #[default]
    None,
    Gemini,
    Gopher,
    Finger,
    Web,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NavigationState {
    Idle,
    InFlight {
        client: ClientKind,
        url: Url,
        redirections_used: u32,
    },
    Rendering,
    Loaded,
    Errored,
}

/// Everything a tab reports back to the shell. Prompt variants expect
/// an answer through `provide_input`, `provide_identity` or
/// `confirm_disable_identity`; the rest are notifications.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TabEvent {
    AskInput { prompt: String },
    PickIdentity { prompt: String, scope: CertificateScope },
    ConfirmDisableIdentity,
    Warning(String),
    OpenExternal(Url),
    TitleChanged(String),
    LocationChanged(Url),
    Progress { transferred: usize, elapsed: Duration },
    FileLoaded { size: usize, mime: String, elapsed: Duration },
}

/// Preference snapshot handed to the tab at construction.
#[derive(Debug, Clone)]
pub struct Preferences {
    pub text_display: TextDisplay,
    pub use_os_scheme_handler: bool,
}

impl Default for Preferences {
    fn default() -> Self {
        Self {
            text_display: TextDisplay::Fancy,
            use_os_scheme_handler: false,
        }
    }
}

#[derive(Debug, Default)]
enum PendingPrompt {
    #[default]
    None,
    Input {
        prompt: String,
    },
    Identity {
        prompt: String,
        scope: CertificateScope,
    },
    DisableIdentity,
}

/// Per-tab navigation controller.
///
/// Turns "go to URL" into exactly one terminal outcome per navigation:
/// a rendered page or a synthetic error page. Owns the four protocol
/// clients, enforces at-most-one in flight, drives the redirect cap and
/// the input/certificate prompt flows, and keeps the visit history.
pub struct Tab {
    registry: Rc<RefCell<SchemeRegistry>>,
    favourites: Rc<RefCell<Favourites>>,
    prefs: Preferences,
    gemini: GeminiClient,
    gopher: GopherClient,
    finger: FingerClient,
    web: WebClient,
    active: ActiveClient,
    state: NavigationState,
    history: History,
    history_index: Option<usize>,
    current_location: Option<Url>,
    current_mime: String,
    current_buffer: Vec<u8>,
    current_renderer: Option<RendererKind>,
    current_identity: Option<CryptoIdentity>,
    pending: PendingPrompt,
    successfully_loaded: bool,
    started_at: Option<Instant>,
}

impl Tab {
    pub fn new(
        registry: Rc<RefCell<SchemeRegistry>>,
        favourites: Rc<RefCell<Favourites>>,
        prefs: Preferences,
    ) -> Self {
        Self {
            registry,
            favourites,
            prefs,
            gemini: GeminiClient::new(),
            gopher: GopherClient::new(),
            finger: FingerClient::new(),
            web: WebClient::new(),
            active: ActiveClient::None,
            state: NavigationState::Idle,
            history: History::new(),
            history_index: None,
            current_location: None,
            current_mime: String::new(),
            current_buffer: Vec::new(),
            current_renderer: None,
            current_identity: None,
            pending: PendingPrompt::None,
            successfully_loaded: false,
            started_at: None,
        }
    }

    pub fn state(&self) -> &NavigationState {
        &self.state
    }

    pub fn is_in_flight(&self) -> bool {
        matches!(self.state, NavigationState::InFlight { .. })
    }

    pub fn has_pending_prompt(&self) -> bool {
        !matches!(self.pending, PendingPrompt::None)
    }

    pub fn current_location(&self) -> Option<&Url> {
        self.current_location.as_ref()
    }

    pub fn current_mime(&self) -> &str {
        &self.current_mime
    }

    pub fn current_buffer(&self) -> &[u8] {
        &self.current_buffer
    }

    pub fn renderer(&self) -> Option<RendererKind> {
        self.current_renderer
    }

    pub fn successfully_loaded(&self) -> bool {
        self.successfully_loaded
    }

    /// Synthetic document for responses no renderer handles.
    pub fn placeholder_document(&self) -> Option<String> {
        if self.current_renderer == Some(RendererKind::Unsupported) {
            Some(render::unsupported_notice(
                &self.current_mime,
                self.current_buffer.len(),
            ))
        } else {
            None
        }
    }

    pub fn navigate_to(&mut self, url: Url, mode: HistoryMode) -> Vec<TabEvent> {
        let support = self.registry.borrow().support(url.scheme());
        if support != SchemeSupport::Enabled {
            return vec![TabEvent::Warning(format!(
                "URI scheme not supported or disabled: {}",
                url.scheme()
            ))];
        }

        tracing::debug!(%url, "navigating");
        self.started_at = Some(Instant::now());
        self.current_location = Some(url.clone());
        self.cancel_all();
        self.successfully_loaded = false;
        self.pending = PendingPrompt::None;
        self.state = NavigationState::Idle;

        let mut events = Vec::new();
        match url.scheme() {
            "gemini" => events.extend(self.dispatch(ClientKind::Gemini, url.clone(), 0)),
            "http" | "https" => events.extend(self.dispatch(ClientKind::Web, url.clone(), 0)),
            "gopher" => events.extend(self.dispatch(ClientKind::Gopher, url.clone(), 0)),
            "finger" => events.extend(self.dispatch(ClientKind::Finger, url.clone(), 0)),
            "file" => match local::fetch_file(&url) {
                Ok((body, mime)) => events.extend(self.complete(body, mime)),
                Err(e) => events.extend(self.request_failed(&format!("Request failed:\n{e}"))),
            },
            "about" => {
                let favourites = self.favourites.borrow().get_all().to_vec();
                match local::fetch_about(&url, &favourites) {
                    Ok((body, mime)) => events.extend(self.complete(body, mime)),
                    Err(e) => events.push(TabEvent::Warning(e.to_string())),
                }
            }
            other => {
                events.push(TabEvent::Warning(format!(
                    "URI scheme not supported or disabled: {other}"
                )));
                return events;
            }
        }

        if mode == HistoryMode::PushImmediate {
            self.push_history(url);
        }
        events
    }

    pub fn reload(&mut self) -> Vec<TabEvent> {
        match self.current_location.clone() {
            Some(url) => self.navigate_to(url, HistoryMode::DontPush),
            None => Vec::new(),
        }
    }

    pub fn navigate_back(&mut self) -> Vec<TabEvent> {
        match self.history.one_backward(self.history_index) {
            Some(index) => self.navigate_history(index),
            None => Vec::new(),
        }
    }

    pub fn navigate_forward(&mut self) -> Vec<TabEvent> {
        match self.history.one_forward(self.history_index) {
            Some(index) => self.navigate_history(index),
            None => Vec::new(),
        }
    }

    pub fn can_go_back(&self) -> bool {
        self.history.one_backward(self.history_index).is_some()
    }

    pub fn can_go_forward(&self) -> bool {
        self.history.one_forward(self.history_index).is_some()
    }

    /// Resolve an anchor reference against the current page and either
    /// navigate, hand the URL to the OS, or warn.
    pub fn follow_link(&mut self, href: &str) -> Vec<TabEvent> {
        let resolved = match Url::parse(href) {
            Ok(url) => Ok(url),
            Err(url::ParseError::RelativeUrlWithoutBase) => match &self.current_location {
                Some(base) => base.join(href).map_err(|e| e.to_string()),
                None => Err("no current location to resolve against".to_string()),
            },
            Err(e) => Err(e.to_string()),
        };
        let url = match resolved {
            Ok(url) => url,
            Err(reason) => {
                return vec![TabEvent::Warning(format!(
                    "Cannot open link {href}: {reason}"
                ))]
            }
        };

        let support = self.registry.borrow().support(url.scheme());
        match support {
            SchemeSupport::Enabled => self.navigate_to(url, HistoryMode::PushImmediate),
            _ if self.prefs.use_os_scheme_handler => vec![TabEvent::OpenExternal(url)],
            SchemeSupport::Disabled => vec![TabEvent::Warning(format!(
                "The requested URL uses a scheme that has been disabled in the settings:\r\n{url}"
            ))],
            SchemeSupport::Unsupported => vec![TabEvent::Warning(format!(
                "The requested URL cannot be processed:\r\n{url}"
            ))],
        }
    }

    /// Cancel whatever is on the wire without dispatching anything new.
    pub fn stop(&mut self) {
        self.cancel_all();
        if self.is_in_flight() {
            self.state = NavigationState::Idle;
        }
    }

    /// Pump the active client and translate its events.
    pub fn poll(&mut self) -> Vec<TabEvent> {
        let client_events = match self.active {
            ActiveClient::None => return Vec::new(),
            ActiveClient::Gemini => self.gemini.poll(),
            ActiveClient::Gopher => self.gopher.poll(),
            ActiveClient::Finger => self.finger.poll(),
            ActiveClient::Web => self.web.poll(),
        };
        let mut events = Vec::new();
        for event in client_events {
            events.extend(self.handle_client_event(event));
        }
        events
    }

    pub(crate) fn handle_client_event(&mut self, event: ClientEvent) -> Vec<TabEvent> {
        match event {
            ClientEvent::Progress(transferred) => vec![TabEvent::Progress {
                transferred,
                elapsed: self.elapsed(),
            }],
            ClientEvent::Complete { body, mime } => {
                self.active = ActiveClient::None;
                self.complete(body, mime)
            }
            ClientEvent::Failed(reason) => self.request_failed(&format!("Request failed:\n{reason}")),
            ClientEvent::ProtocolViolation(reason) => {
                self.request_failed(&format!("Protocol violation:\n{reason}"))
            }
            ClientEvent::InputRequired { prompt } => {
                self.active = ActiveClient::None;
                self.pending = PendingPrompt::Input {
                    prompt: prompt.clone(),
                };
                vec![TabEvent::AskInput { prompt }]
            }
            ClientEvent::Redirected { url, is_permanent } => {
                self.handle_redirected(url, is_permanent)
            }
            ClientEvent::TemporaryFailure { kind, info } => {
                self.request_failed(&format!("{}\n{info}", temporary_label(kind)))
            }
            ClientEvent::PermanentFailure { kind, info } => {
                self.request_failed(&format!("{}\n{info}", permanent_label(kind)))
            }
            ClientEvent::CertificateRequested { scope, prompt } => {
                self.active = ActiveClient::None;
                self.pending = PendingPrompt::Identity {
                    prompt: prompt.clone(),
                    scope,
                };
                vec![TabEvent::PickIdentity { prompt, scope }]
            }
            ClientEvent::CertificateRejected { kind, info } => {
                self.request_failed(&format!("{}\n{info}", rejection_label(kind)))
            }
        }
    }

    /// Answer (or cancel) an input prompt. Accepting re-issues the
    /// current URL with the input as its query component.
    pub fn provide_input(&mut self, response: Option<String>) -> Vec<TabEvent> {
        match std::mem::take(&mut self.pending) {
            PendingPrompt::Input { prompt } => match response {
                Some(text) => {
                    let Some(mut url) = self.current_location.clone() else {
                        return Vec::new();
                    };
                    url.set_query(Some(&text));
                    self.navigate_to(url, HistoryMode::DontPush)
                }
                None => self.request_failed(&format!("Site requires input:\n{prompt}")),
            },
            other => {
                tracing::warn!("input response with no pending input prompt");
                self.pending = other;
                Vec::new()
            }
        }
    }

    /// Answer (or decline) a certificate prompt. A valid identity is
    /// enabled on the Gemini client and the current URL is re-issued;
    /// anything else clears the client certificate and renders an
    /// error page carrying the server's original query.
    pub fn provide_identity(&mut self, identity: Option<CryptoIdentity>) -> Vec<TabEvent> {
        match std::mem::take(&mut self.pending) {
            PendingPrompt::Identity { prompt, scope } => match identity {
                Some(identity) if identity.is_valid() => {
                    match self.gemini.enable_client_certificate(identity.clone()) {
                        Ok(()) => {
                            self.current_identity = Some(identity);
                            let Some(url) = self.current_location.clone() else {
                                return Vec::new();
                            };
                            self.navigate_to(url, HistoryMode::DontPush)
                        }
                        Err(e) => {
                            self.clear_identity();
                            self.request_failed(&format!(
                                "Failed to activate the crypto identity: {e}\r\nOriginal query was: {prompt}"
                            ))
                        }
                    }
                }
                _ => {
                    self.clear_identity();
                    self.request_failed(&format!(
                        "The page requested a {} client certificate, but none was provided.\r\nOriginal query was: {prompt}",
                        scope_noun(scope)
                    ))
                }
            },
            other => {
                tracing::warn!("identity response with no pending certificate prompt");
                self.pending = other;
                Vec::new()
            }
        }
    }

    /// Drop the client certificate. Clearing a transient identity is
    /// unrecoverable, so that case asks for confirmation first.
    pub fn disable_client_certificate(&mut self) -> Vec<TabEvent> {
        let transient = self
            .current_identity
            .as_ref()
            .is_some_and(|identity| !identity.is_persistent);
        if transient {
            self.pending = PendingPrompt::DisableIdentity;
            vec![TabEvent::ConfirmDisableIdentity]
        } else {
            self.clear_identity();
            Vec::new()
        }
    }

    pub fn confirm_disable_identity(&mut self, confirmed: bool) -> Vec<TabEvent> {
        match std::mem::take(&mut self.pending) {
            PendingPrompt::DisableIdentity => {
                if confirmed {
                    self.clear_identity();
                }
                Vec::new()
            }
            other => {
                tracing::warn!("confirmation with no pending disable prompt");
                self.pending = other;
                Vec::new()
            }
        }
    }

    pub fn current_identity(&self) -> Option<&CryptoIdentity> {
        self.current_identity.as_ref()
    }

    pub fn set_favourite(&mut self, favourite: bool) {
        let Some(url) = self.current_location.clone() else {
            return;
        };
        let mut favourites = self.favourites.borrow_mut();
        if favourite {
            favourites.add(url);
        } else {
            favourites.remove(&url);
        }
    }

    pub fn is_favourite(&self) -> bool {
        match &self.current_location {
            Some(url) => self.favourites.borrow().contains(url),
            None => false,
        }
    }

    fn navigate_history(&mut self, index: usize) -> Vec<TabEvent> {
        let Some(url) = self.history.get(index).cloned() else {
            return Vec::new();
        };
        self.history_index = Some(index);
        self.navigate_to(url, HistoryMode::DontPush)
    }

    fn push_history(&mut self, url: Url) {
        self.history_index = Some(self.history.push(self.history_index, url));
    }

    fn dispatch(&mut self, kind: ClientKind, url: Url, redirections_used: u32) -> Vec<TabEvent> {
        let started = match kind {
            ClientKind::Gemini => self.gemini.start_request(&url),
            ClientKind::Gopher => self.gopher.start_request(&url),
            ClientKind::Finger => self.finger.start_request(&url),
            ClientKind::Web => self.web.start_request(&url),
        };
        match started {
            Ok(()) => {
                self.active = match kind {
                    ClientKind::Gemini => ActiveClient::Gemini,
                    ClientKind::Gopher => ActiveClient::Gopher,
                    ClientKind::Finger => ActiveClient::Finger,
                    ClientKind::Web => ActiveClient::Web,
                };
                self.state = NavigationState::InFlight {
                    client: kind,
                    url,
                    redirections_used,
                };
                Vec::new()
            }
            Err(e) => self.request_failed(&format!("Request failed:\n{e}")),
        }
    }

    /// Re-issue against the redirect target on the same client, without
    /// touching history. The sixth consecutive redirect aborts.
    fn handle_redirected(&mut self, url: Url, is_permanent: bool) -> Vec<TabEvent> {
        tracing::debug!(%url, is_permanent, "redirected");
        let (client, redirections_used) = match &self.state {
            NavigationState::InFlight {
                client,
                redirections_used,
                ..
            } => (*client, *redirections_used),
            _ => {
                tracing::warn!("redirect event outside of an in-flight request");
                return Vec::new();
            }
        };
        if redirections_used >= 5 {
            return self.request_failed("Too many redirections!");
        }
        // The client went idle when it reported the redirect; an
        // idempotent cancel keeps that true on every path.
        self.cancel_client(client);
        self.current_location = Some(url.clone());
        let mut events = vec![TabEvent::LocationChanged(url.clone())];
        events.extend(self.dispatch(client, url, redirections_used + 1));
        events
    }

    fn complete(&mut self, body: Vec<u8>, mime: String) -> Vec<TabEvent> {
        tracing::debug!(size = body.len(), %mime, "loaded");
        self.state = NavigationState::Rendering;
        let plaintext_only = self.prefs.text_display == TextDisplay::Plain;
        self.current_renderer = Some(RendererKind::select(&mime, plaintext_only));
        self.current_mime = mime.clone();
        self.current_buffer = body;

        let mut events = Vec::new();
        if let Some(location) = self.current_location.clone() {
            events.push(TabEvent::LocationChanged(location.clone()));
            events.push(TabEvent::TitleChanged(location.to_string()));
        }
        events.push(TabEvent::FileLoaded {
            size: self.current_buffer.len(),
            mime,
            elapsed: self.elapsed(),
        });
        self.successfully_loaded = true;
        self.state = NavigationState::Loaded;
        events
    }

    /// Any terminal failure becomes a synthetic plain-text page so the
    /// tab stays consistent and navigable.
    fn request_failed(&mut self, message: &str) -> Vec<TabEvent> {
        tracing::warn!(%message, "navigation failed");
        self.cancel_all();
        let body = format!("An error happened:\r\n{message}").into_bytes();
        let events = self.complete(body, "text/plain".to_string());
        self.successfully_loaded = false;
        self.state = NavigationState::Errored;
        events
    }

    fn cancel_client(&mut self, kind: ClientKind) {
        match kind {
            ClientKind::Gemini => self.gemini.cancel_request(),
            ClientKind::Gopher => self.gopher.cancel_request(),
            ClientKind::Finger => self.finger.cancel_request(),
            ClientKind::Web => self.web.cancel_request(),
        }
    }

    fn cancel_all(&mut self) {
        self.gemini.cancel_request();
        self.gopher.cancel_request();
        self.finger.cancel_request();
        self.web.cancel_request();
        self.active = ActiveClient::None;
    }

    fn clear_identity(&mut self) {
        self.gemini.disable_client_certificate();
        self.current_identity = None;
    }

    fn elapsed(&self) -> Duration {
        self.started_at.map(|t| t.elapsed()).unwrap_or_default()
    }
}

fn scope_noun(scope: CertificateScope) -> &'static str {
    match scope {
        CertificateScope::Transient => "transient",
        CertificateScope::Authorised => "authorised",
    }
}

fn temporary_label(kind: TemporaryFailure) -> &'static str {
    match kind {
        TemporaryFailure::Unspecified => "Temporary Failure",
        TemporaryFailure::ServerUnavailable => "Server Unavailable",
        TemporaryFailure::CgiError => "CGI Error",
        TemporaryFailure::ProxyError => "Proxy Error",
        TemporaryFailure::SlowDown => "Slow Down",
    }
}

fn permanent_label(kind: PermanentFailure) -> &'static str {
    match kind {
        PermanentFailure::Unspecified => "Permanent Failure",
        PermanentFailure::NotFound => "Not Found",
        PermanentFailure::Gone => "Gone",
        PermanentFailure::ProxyRequestRequired => "Proxy Request Required",
        PermanentFailure::BadRequest => "Bad Request",
    }
}

fn rejection_label(kind: CertificateRejection) -> &'static str {
    match kind {
        CertificateRejection::Unspecified => "Certificate Rejected",
        CertificateRejection::NotAccepted => "Certificate not accepted",
        CertificateRejection::FutureCertificateRejected => "Certificate is not yet valid",
        CertificateRejection::ExpiredCertificateRejected => "Certificate expired",
    }
}
