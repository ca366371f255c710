use url::Url;

/// The in-memory favourites set. Persistence belongs to the shell; the
/// core only needs membership and enumeration.
#[derive(Debug, Default)]
pub struct Favourites {
    entries: Vec<Url>,
}

impl Favourites {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, url: Url) {
        if !self.contains(&url) {
            self.entries.push(url);
        }
    }

    pub fn remove(&mut self, url: &Url) {
        self.entries.retain(|entry| entry != url);
    }

    pub fn contains(&self, url: &Url) -> bool {
        self.entries.iter().any(|entry| entry == url)
    }

    pub fn get_all(&self) -> &[Url] {
        &self.entries
    }
}
