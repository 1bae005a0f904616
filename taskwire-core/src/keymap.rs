//! Deterministic derivation of store keys from `(app, queue, ...)`.
//!
//! Key shapes are part of the external storage contract and must be
//! reproduced bit-exactly for cross-implementation interoperability; see
//! SPEC_FULL.md §4.1 / §6.

/// Stateless key formatter for a single `(app, queue)` pair.
#[derive(Debug, Clone, Copy)]
pub struct KeyMap<'a> {
    app: &'a str,
    queue: &'a str,
}

impl<'a> KeyMap<'a> {
    pub fn new(app: &'a str, queue: &'a str) -> Self {
        Self { app, queue }
    }

    /// `("AX:INC", "{app}:{queue}")` — the hash key and field used with
    /// `incr` to allocate monotonic per-queue ids.
    pub fn counter(&self) -> (&'static str, String) {
        ("AX:INC", format!("{}:{}", self.app, self.queue))
    }

    /// `AX:META:{app}:{queue}:{id}` — the metadata hash for a task.
    pub fn meta(&self, id: i64) -> String {
        format!("AX:META:{}:{}:{}", self.app, self.queue, id)
    }

    /// `AX:CNAME:{app}:{queue}:{cname}` — the cname→id pointer.
    pub fn cname(&self, cname: &str) -> String {
        format!("AX:CNAME:{}:{}:{}", self.app, self.queue, cname)
    }

    /// `AX:UUID:{app}:{queue}` — the uuid→id sorted set.
    pub fn uuid_set(&self) -> String {
        format!("AX:UUID:{}:{}", self.app, self.queue)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counter_key() {
        let km = KeyMap::new("test", "custom");
        assert_eq!(km.counter(), ("AX:INC", "test:custom".to_string()));
    }

    #[test]
    fn meta_key() {
        let km = KeyMap::new("test", "custom");
        assert_eq!(km.meta(12345), "AX:META:test:custom:12345");
    }

    #[test]
    fn cname_key() {
        let km = KeyMap::new("test", "custom");
        assert_eq!(km.cname("task001"), "AX:CNAME:test:custom:task001");
    }

    #[test]
    fn uuid_key() {
        let km = KeyMap::new("test", "custom");
        assert_eq!(km.uuid_set(), "AX:UUID:test:custom");
    }
}
