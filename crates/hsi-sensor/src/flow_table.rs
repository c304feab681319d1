//! Flow identification and per-flow sessions

use hsi_core::{FlowData, FlowSession, SectionType, Session, SourceId, HTTP_INSPECTOR_ID};
use std::collections::HashMap;
use std::fmt;
use std::hash::{DefaultHasher, Hash, Hasher};
use std::net::{IpAddr, Ipv4Addr, SocketAddr};

/// Connection endpoints, client first
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FlowKey {
    pub client: SocketAddr,
    pub server: SocketAddr,
}

impl FlowKey {
    /// A distinct key for the `seq`th replayed flow
    pub fn synthetic(seq: u32) -> Self {
        let client = Ipv4Addr::from(0x0a00_0000 | (seq & 0x00ff_ffff));
        let port = 1024 + (seq >> 24) as u16;
        Self {
            client: SocketAddr::new(IpAddr::V4(client), port),
            server: SocketAddr::new(IpAddr::V4(Ipv4Addr::new(192, 0, 2, 80)), 80),
        }
    }

    /// Picks one of `shards` workers; every chunk of a flow lands on the
    /// same one
    pub fn shard(&self, shards: usize) -> usize {
        let mut hasher = DefaultHasher::new();
        self.hash(&mut hasher);
        (hasher.finish() as usize) % shards.max(1)
    }
}

impl fmt::Display for FlowKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}", self.client, self.server)
    }
}

/// Sessions of the flows one worker owns
#[derive(Debug, Default)]
pub struct FlowTable {
    flows: HashMap<FlowKey, Session>,
}

impl FlowTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn session(&mut self, key: FlowKey) -> &mut Session {
        self.flows.entry(key).or_default()
    }

    pub fn remove(&mut self, key: &FlowKey) -> bool {
        self.flows.remove(key).is_some()
    }

    pub fn len(&self) -> usize {
        self.flows.len()
    }

    /// Drops the flow once neither direction can produce more sections.
    /// Only looks at existing flow data, never creates it.
    pub fn release_if_finished(&mut self, key: &FlowKey) -> bool {
        let Some(session) = self.flows.get_mut(key) else {
            return false;
        };
        let finished = match session
            .app_data_mut(HTTP_INSPECTOR_ID)
            .and_then(|data| data.downcast_mut::<FlowData>())
        {
            Some(flow) => SourceId::ALL
                .iter()
                .all(|source| is_finished(flow.expected(*source))),
            None => true,
        };
        if finished {
            self.flows.remove(key);
        }
        finished
    }
}

fn is_finished(state: SectionType) -> bool {
    matches!(state, SectionType::Closed | SectionType::Abort)
}

#[cfg(test)]
mod tests {
    use super::*;
    use hsi_core::{Chunk, InspectSettings, Inspector};

    #[test]
    fn test_synthetic_keys_differ() {
        assert_ne!(FlowKey::synthetic(1), FlowKey::synthetic(2));
        assert_eq!(FlowKey::synthetic(7), FlowKey::synthetic(7));
        assert_eq!(
            FlowKey::synthetic(1).to_string(),
            "10.0.0.1:1024-192.0.2.80:80"
        );
    }

    #[test]
    fn test_shard_is_stable() {
        let key = FlowKey::synthetic(42);
        assert_eq!(key.shard(4), key.shard(4));
        assert!(key.shard(4) < 4);
        assert_eq!(key.shard(0), 0);
    }

    #[test]
    fn test_release_after_both_directions_close() {
        let mut inspector = Inspector::new(InspectSettings::default());
        let mut table = FlowTable::new();
        let key = FlowKey::synthetic(1);

        let chunk = Chunk::new(SourceId::Client, &b"GET / HTTP/1.1\r\n\r\n"[..]).closing();
        inspector.process(chunk, table.session(key)).unwrap();
        assert!(!table.release_if_finished(&key));

        let chunk = Chunk::new(SourceId::Server, &b"HTTP/1.1 204 No Content\r\n\r\n"[..]).closing();
        inspector.process(chunk, table.session(key)).unwrap();
        assert!(table.release_if_finished(&key));
        assert_eq!(table.len(), 0);
    }

    #[test]
    fn test_release_without_flow_data() {
        let mut table = FlowTable::new();
        let key = FlowKey::synthetic(3);
        assert!(table.session(key).app_data_mut(HTTP_INSPECTOR_ID).is_none());

        assert!(table.release_if_finished(&key));
        assert_eq!(table.len(), 0);
        assert!(!table.release_if_finished(&key));
    }

    #[test]
    fn test_release_check_leaves_open_flow_untouched() {
        let mut inspector = Inspector::new(InspectSettings::default());
        let mut table = FlowTable::new();
        let key = FlowKey::synthetic(4);
        let chunk = Chunk::new(SourceId::Client, &b"GET / HTTP/1.1\r\n"[..]);
        inspector.process(chunk, table.session(key)).unwrap();
        let created = inspector.metrics().flows_created.load(std::sync::atomic::Ordering::Relaxed);

        assert!(!table.release_if_finished(&key));
        assert_eq!(
            inspector.metrics().flows_created.load(std::sync::atomic::Ordering::Relaxed),
            created
        );
        let flow = table
            .session(key)
            .app_data_mut(HTTP_INSPECTOR_ID)
            .and_then(|data| data.downcast_mut::<FlowData>())
            .unwrap();
        assert_eq!(flow.expected(SourceId::Client), SectionType::Header);
    }
}
