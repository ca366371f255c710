/// The renderer a response body should be handed to. Selection is
/// total: anything no renderer understands falls through to
/// `Unsupported`, which gets a placeholder document instead.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RendererKind {
    Gemini,
    Gophermap,
    PlainText,
    Html,
    Markdown,
    Image,
    Media,
    Unsupported,
}

impl RendererKind {
    pub fn select(mime: &str, plaintext_only: bool) -> Self {
        if mime.starts_with("text/") {
            if plaintext_only {
                return RendererKind::PlainText;
            }
            return if mime.starts_with("text/gemini") {
                RendererKind::Gemini
            } else if mime.starts_with("text/gophermap") {
                RendererKind::Gophermap
            } else if mime.starts_with("text/html") {
                RendererKind::Html
            } else if mime.starts_with("text/markdown") {
                RendererKind::Markdown
            } else {
                // Covers text/finger and every other text type.
                RendererKind::PlainText
            };
        }
        if mime.starts_with("image/") {
            RendererKind::Image
        } else if mime.starts_with("audio/") || mime.starts_with("video/") {
            RendererKind::Media
        } else {
            RendererKind::Unsupported
        }
    }
}

pub fn size_human(bytes: usize) -> String {
    if bytes < 1024 {
        format!("{bytes} B")
    } else if bytes < 1024 * 1024 {
        format!("{:.1} KiB", bytes as f64 / 1024.0)
    } else {
        format!("{:.1} MiB", bytes as f64 / (1024.0 * 1024.0))
    }
}

/// Placeholder document shown for media types nothing can render.
pub fn unsupported_notice(mime: &str, size: usize) -> String {
    format!(
        "You accessed an unsupported media type!\n\n\
         Save the file to your local disk or navigate somewhere else.\n\n\
         Info:\n\
         MIME Type: {mime}\n\
         File Size: {}\n",
        size_human(size)
    )
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn routing_by_mime_prefix() {
        assert_eq!(
            RendererKind::select("text/gemini; charset=utf-8", false),
            RendererKind::Gemini
        );
        assert_eq!(
            RendererKind::select("text/gophermap", false),
            RendererKind::Gophermap
        );
        assert_eq!(
            RendererKind::select("text/finger", false),
            RendererKind::PlainText
        );
        assert_eq!(RendererKind::select("text/html", false), RendererKind::Html);
        assert_eq!(
            RendererKind::select("text/markdown", false),
            RendererKind::Markdown
        );
        assert_eq!(
            RendererKind::select("text/csv", false),
            RendererKind::PlainText
        );
        assert_eq!(
            RendererKind::select("image/png", false),
            RendererKind::Image
        );
        assert_eq!(
            RendererKind::select("audio/ogg", false),
            RendererKind::Media
        );
        assert_eq!(
            RendererKind::select("video/mp4", false),
            RendererKind::Media
        );
    }

    #[test]
    fn everything_else_falls_through() {
        assert_eq!(
            RendererKind::select("application/octet-stream", false),
            RendererKind::Unsupported
        );
        assert_eq!(
            RendererKind::select("application/pdf", false),
            RendererKind::Unsupported
        );
        assert_eq!(RendererKind::select("", false), RendererKind::Unsupported);
        assert_eq!(
            RendererKind::select("nonsense", false),
            RendererKind::Unsupported
        );
    }

    #[test]
    fn plaintext_preference_overrides_text_renderers() {
        for mime in ["text/gemini", "text/gophermap", "text/html", "text/markdown"] {
            assert_eq!(RendererKind::select(mime, true), RendererKind::PlainText);
        }
        // Non-text routing is unaffected.
        assert_eq!(RendererKind::select("image/gif", true), RendererKind::Image);
    }

    #[test]
    fn human_readable_sizes() {
        assert_eq!(size_human(0), "0 B");
        assert_eq!(size_human(1023), "1023 B");
        assert_eq!(size_human(2048), "2.0 KiB");
        assert_eq!(size_human(3 * 1024 * 1024), "3.0 MiB");
    }

    #[test]
    fn unsupported_notice_names_type_and_size() {
        let notice = unsupported_notice("application/zip", 2048);
        assert!(notice.contains("application/zip"));
        assert!(notice.contains("2.0 KiB"));
    }
}
