use std::collections::BTreeMap;

/// Registry of attached input sources keyed by source name.
///
/// Attach and detach are idempotent. Both return `Some(connected)` only when
/// the attached count crosses between zero and non-zero, so callers can
/// forward the result straight to listeners without re-notifying.
pub struct InputSources<C> {
    sources: BTreeMap<String, C>,
}

impl<C> Default for InputSources<C> {
    fn default() -> Self {
        Self::new()
    }
}

impl<C> InputSources<C> {
    pub fn new() -> Self {
        Self {
            sources: BTreeMap::new(),
        }
    }

    pub fn contains(&self, name: &str) -> bool {
        self.sources.contains_key(name)
    }

    /// Attach a source. A second attach under the same name keeps the first
    /// source and drops `source`.
    pub fn attach(&mut self, name: &str, source: C) -> Option<bool> {
        if self.sources.contains_key(name) {
            return None;
        }
        let was_connected = self.connected();
        self.sources.insert(name.to_string(), source);
        log::info!("MIDI source attached: {name}");
        (!was_connected).then_some(true)
    }

    pub fn detach(&mut self, name: &str) -> Option<bool> {
        self.sources.remove(name)?;
        log::info!("MIDI source detached: {name}");
        (!self.connected()).then_some(false)
    }

    /// Detach every source whose name `keep` rejects. Returns the final
    /// transition if one happened.
    pub fn retain(&mut self, mut keep: impl FnMut(&str) -> bool) -> Option<bool> {
        let gone: Vec<String> = self
            .sources
            .keys()
            .filter(|name| !keep(name.as_str()))
            .cloned()
            .collect();
        let mut change = None;
        for name in gone {
            if let Some(c) = self.detach(&name) {
                change = Some(c);
            }
        }
        change
    }

    pub fn connected(&self) -> bool {
        !self.sources.is_empty()
    }

    pub fn len(&self) -> usize {
        self.sources.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sources.is_empty()
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.sources.keys().map(String::as_str)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn first_attach_reports_connected() {
        let mut s = InputSources::new();
        assert!(!s.connected());
        assert_eq!(s.attach("a", 1), Some(true));
        assert!(s.connected());
    }

    #[test]
    fn attach_is_idempotent() {
        let mut s = InputSources::new();
        s.attach("a", 1);
        assert_eq!(s.attach("a", 2), None);
        assert_eq!(s.len(), 1);
    }

    #[test]
    fn second_source_does_not_renotify() {
        let mut s = InputSources::new();
        s.attach("a", 1);
        assert_eq!(s.attach("b", 2), None);
        assert_eq!(s.len(), 2);
    }

    #[test]
    fn detach_reports_only_last_source() {
        let mut s = InputSources::new();
        s.attach("a", 1);
        s.attach("b", 2);
        assert_eq!(s.detach("a"), None);
        assert_eq!(s.detach("b"), Some(false));
        assert!(!s.connected());
    }

    #[test]
    fn detach_is_idempotent() {
        let mut s = InputSources::new();
        s.attach("a", 1);
        assert_eq!(s.detach("a"), Some(false));
        assert_eq!(s.detach("a"), None);
        assert_eq!(s.detach("never"), None);
    }

    #[test]
    fn retain_detaches_vanished() {
        let mut s = InputSources::new();
        s.attach("a", 1);
        s.attach("b", 2);
        assert_eq!(s.retain(|n| n == "b"), None);
        assert_eq!(s.names().collect::<Vec<_>>(), vec!["b"]);
        assert_eq!(s.retain(|_| false), Some(false));
        assert!(s.is_empty());
    }
}
