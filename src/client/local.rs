use std::path::Path;

use thiserror::Error;
use url::Url;

const ABOUT_HELP: &str = include_str!("about/help.gemini");

#[derive(Error, Debug)]
pub enum LocalError {
    #[error("could not read {path}: {source}")]
    Io {
        path: String,
        source: std::io::Error,
    },
    #[error("not a local file URL: {0}")]
    BadPath(String),
    #[error("Unknown location: {0}")]
    UnknownAboutPage(String),
}

/// Read a `file://` URL and sniff its MIME type from the extension,
/// falling back to a UTF-8 check on the contents.
pub fn fetch_file(url: &Url) -> Result<(Vec<u8>, String), LocalError> {
    let path = url
        .to_file_path()
        .map_err(|_| LocalError::BadPath(url.to_string()))?;
    let data = std::fs::read(&path).map_err(|source| LocalError::Io {
        path: path.display().to_string(),
        source,
    })?;
    let mime = sniff_mime(&path, &data);
    tracing::debug!(path = %path.display(), %mime, "loaded local file");
    Ok((data, mime))
}

/// Serve an `about:` URL. `blank` is an empty gemtext document,
/// `favourites` is generated from the given list, anything else must
/// name an embedded page.
pub fn fetch_about(url: &Url, favourites: &[Url]) -> Result<(Vec<u8>, String), LocalError> {
    match url.path() {
        "blank" => Ok((Vec::new(), "text/gemini".to_string())),
        "favourites" => Ok((
            favourites_document(favourites).into_bytes(),
            "text/gemini".to_string(),
        )),
        name => embedded_page(name)
            .map(|text| (text.as_bytes().to_vec(), "text/gemini".to_string()))
            .ok_or_else(|| LocalError::UnknownAboutPage(name.to_string())),
    }
}

fn favourites_document(favourites: &[Url]) -> String {
    let mut document = String::from("# Favourites\n\n");
    for fav in favourites {
        document.push_str("=> ");
        document.push_str(fav.as_str());
        document.push('\n');
    }
    document
}

fn embedded_page(name: &str) -> Option<&'static str> {
    match name {
        "help" => Some(ABOUT_HELP),
        _ => None,
    }
}

/// Extension-based MIME guess for a URL path. Shared with the HTTP
/// client for responses without a Content-Type header.
pub(crate) fn mime_for_url(url: &Url) -> Option<&'static str> {
    let path = url.path();
    let (_, extension) = path.rsplit_once('.')?;
    ext_mime(extension)
}

fn sniff_mime(path: &Path, data: &[u8]) -> String {
    if let Some(mime) = path
        .extension()
        .and_then(|ext| ext.to_str())
        .and_then(ext_mime)
    {
        return mime.to_string();
    }
    if std::str::from_utf8(data).is_ok() {
        "text/plain".to_string()
    } else {
        "application/octet-stream".to_string()
    }
}

fn ext_mime(extension: &str) -> Option<&'static str> {
    let mime = match extension.to_ascii_lowercase().as_str() {
        "gmi" | "gemini" => "text/gemini",
        "txt" | "log" => "text/plain",
        "md" | "markdown" => "text/markdown",
        "htm" | "html" => "text/html",
        "xml" => "text/xml",
        "png" => "image/png",
        "jpg" | "jpeg" => "image/jpeg",
        "gif" => "image/gif",
        "webp" => "image/webp",
        "bmp" => "image/bmp",
        "svg" => "image/svg+xml",
        "mp3" => "audio/mpeg",
        "ogg" => "audio/ogg",
        "wav" => "audio/wav",
        "mp4" => "video/mp4",
        "webm" => "video/webm",
        "pdf" => "application/pdf",
        _ => return None,
    };
    Some(mime)
}

#[cfg(test)]
mod test {
    use super::*;

    fn temp_file(name: &str, contents: &[u8]) -> std::path::PathBuf {
        let path = std::env::temp_dir().join(format!("beryl-test-{}-{name}", std::process::id()));
        std::fs::write(&path, contents).unwrap();
        path
    }

    #[test]
    fn file_roundtrip_with_extension_sniff() {
        let path = temp_file("page.gmi", b"# Title\n");
        let url = Url::from_file_path(&path).unwrap();
        let (body, mime) = fetch_file(&url).unwrap();
        assert_eq!(body, b"# Title\n");
        assert_eq!(mime, "text/gemini");
        std::fs::remove_file(path).unwrap();
    }

    #[test]
    fn unknown_extension_falls_back_to_content() {
        let path = temp_file("notes.zzz", b"just text");
        let url = Url::from_file_path(&path).unwrap();
        let (_, mime) = fetch_file(&url).unwrap();
        assert_eq!(mime, "text/plain");
        std::fs::remove_file(&path).unwrap();

        let path = temp_file("blob.zzz", &[0u8, 159, 146, 150]);
        let url = Url::from_file_path(&path).unwrap();
        let (_, mime) = fetch_file(&url).unwrap();
        assert_eq!(mime, "application/octet-stream");
        std::fs::remove_file(path).unwrap();
    }

    #[test]
    fn missing_file_is_an_error() {
        let url = Url::parse("file:///definitely/not/here.txt").unwrap();
        assert!(matches!(fetch_file(&url), Err(LocalError::Io { .. })));
    }

    #[test]
    fn about_blank_is_an_empty_gemtext_document() {
        let url = Url::parse("about:blank").unwrap();
        let (body, mime) = fetch_about(&url, &[]).unwrap();
        assert!(body.is_empty());
        assert_eq!(mime, "text/gemini");
    }

    #[test]
    fn about_favourites_lists_entries() {
        let url = Url::parse("about:favourites").unwrap();
        let favourites = vec![
            Url::parse("gemini://example.com/").unwrap(),
            Url::parse("gopher://example.org/1/").unwrap(),
        ];
        let (body, mime) = fetch_about(&url, &favourites).unwrap();
        let text = String::from_utf8(body).unwrap();
        assert_eq!(mime, "text/gemini");
        assert!(text.starts_with("# Favourites\n"));
        assert!(text.contains("=> gemini://example.com/\n"));
        assert!(text.contains("=> gopher://example.org/1/\n"));
    }

    #[test]
    fn about_help_is_embedded() {
        let url = Url::parse("about:help").unwrap();
        let (body, mime) = fetch_about(&url, &[]).unwrap();
        assert_eq!(mime, "text/gemini");
        assert!(!body.is_empty());
    }

    #[test]
    fn unknown_about_page_is_an_error() {
        let url = Url::parse("about:nonsense").unwrap();
        assert!(matches!(
            fetch_about(&url, &[]),
            Err(LocalError::UnknownAboutPage(name)) if name == "nonsense"
        ));
    }

    #[test]
    fn url_extension_guess() {
        let url = Url::parse("http://example.com/pic.PNG").unwrap();
        assert_eq!(mime_for_url(&url), Some("image/png"));
        let url = Url::parse("http://example.com/no-extension").unwrap();
        assert_eq!(mime_for_url(&url), None);
    }
}
