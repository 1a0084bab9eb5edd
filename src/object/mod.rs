use std::collections::HashMap;
use std::hash::Hash;
use std::sync::{Arc, RwLock};

use tokio::sync::broadcast;
use tracing::warn;

pub use memory::{Memory, OffsetDirection, ToneMode};
pub use meter::{Meter, MeterUnits};
pub use panadapter::Panadapter;
pub use slice::{AgcMode, DemodMode, Slice};
pub use stream::{AudioCodec, AudioDirection, AudioStream};
pub use usb_cable::{BitConfig, CatConfig, UsbCable, UsbCableVariant};
pub use waterfall::Waterfall;

mod memory;
mod meter;
mod panadapter;
mod slice;
mod stream;
mod usb_cable;
mod waterfall;

/// Capacity of each per-collection change-notification channel.
const CHANGE_CHANNEL_CAPACITY: usize = 256;

/// A change applied to one entity collection. Emitted after the mutation is
/// visible, at most once per status line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Change<K> {
    Added(K),
    Updated { key: K, keys_changed: Vec<String> },
    Removed(K),
}

/// A radio entity whose attributes are populated from status key/value
/// tokens. `apply` returns whether the attribute changed; a parse failure
/// skips the key without aborting the rest of the line.
pub(crate) trait Entity {
    fn apply(&mut self, key: &str, value: &str) -> crate::FlexResult<bool>;
}

#[derive(Debug)]
struct Collection<K, V> {
    entries: HashMap<K, V>,
    changes: broadcast::Sender<Change<K>>,
}

impl<K: Clone, V> Default for Collection<K, V> {
    fn default() -> Self {
        let (changes, _) = broadcast::channel(CHANGE_CHANNEL_CAPACITY);
        Self {
            entries: HashMap::new(),
            changes,
        }
    }
}

impl<K, V> Collection<K, V>
where
    K: Clone + Eq + Hash + std::fmt::Debug,
    V: Entity + Clone,
{
    /// Locates or creates the entity, applies every recognized key and
    /// emits a single change notification.
    fn apply(&mut self, key: K, create: impl FnOnce() -> V, kvs: &[(String, String)]) {
        let existed = self.entries.contains_key(&key);
        let entity = self.entries.entry(key.clone()).or_insert_with(create);

        let mut keys_changed = Vec::new();
        for (k, v) in kvs {
            match entity.apply(k, v) {
                Ok(true) => keys_changed.push(k.clone()),
                Ok(false) => {}
                Err(e) => warn!(key = ?key, "skipping status token {}={}: {}", k, v, e),
            }
        }

        let change = if existed {
            Change::Updated { key, keys_changed }
        } else {
            Change::Added(key)
        };
        let _ = self.changes.send(change);
    }

    fn remove(&mut self, key: &K) -> bool {
        if self.entries.remove(key).is_some() {
            let _ = self.changes.send(Change::Removed(key.clone()));
            true
        } else {
            false
        }
    }

    fn clear(&mut self) {
        for key in self.entries.drain().map(|(k, _)| k).collect::<Vec<_>>() {
            let _ = self.changes.send(Change::Removed(key));
        }
    }

    fn get(&self, key: &K) -> Option<V> {
        self.entries.get(key).cloned()
    }

    fn list(&self) -> Vec<V> {
        self.entries.values().cloned().collect()
    }
}

#[derive(Debug, Default)]
struct Inner {
    slices: Collection<u32, Slice>,
    panadapters: Collection<u32, Panadapter>,
    waterfalls: Collection<u32, Waterfall>,
    meters: Collection<u16, Meter>,
    streams: Collection<u32, AudioStream>,
    usb_cables: Collection<String, UsbCable>,
    memories: Collection<u32, Memory>,
}

/// The in-memory mirror of the radio's object model.
///
/// The status router is the only writer; readers obtain cloned snapshots
/// or subscribe to per-collection change streams. A lagging subscriber
/// loses the oldest notifications, never the newest.
#[derive(Debug, Clone, Default)]
pub struct ObjectGraph {
    inner: Arc<RwLock<Inner>>,
}

macro_rules! collection_accessors {
    ($field:ident, $key:ty, $entity:ty, $get:ident, $list:ident, $subscribe:ident) => {
        pub fn $get(&self, key: $key) -> Option<$entity> {
            self.inner.read().unwrap().$field.get(&key)
        }

        pub fn $list(&self) -> Vec<$entity> {
            self.inner.read().unwrap().$field.list()
        }

        pub fn $subscribe(&self) -> broadcast::Receiver<Change<$key>> {
            self.inner.read().unwrap().$field.changes.subscribe()
        }
    };
}

impl ObjectGraph {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    collection_accessors!(slices, u32, Slice, slice, slices, subscribe_slices);
    collection_accessors!(
        panadapters,
        u32,
        Panadapter,
        panadapter,
        panadapters,
        subscribe_panadapters
    );
    collection_accessors!(
        waterfalls,
        u32,
        Waterfall,
        waterfall,
        waterfalls,
        subscribe_waterfalls
    );
    collection_accessors!(meters, u16, Meter, meter, meters, subscribe_meters);
    collection_accessors!(
        streams,
        u32,
        AudioStream,
        audio_stream,
        audio_streams,
        subscribe_audio_streams
    );
    collection_accessors!(memories, u32, Memory, memory, memories, subscribe_memories);

    pub fn usb_cable(&self, serial: &str) -> Option<UsbCable> {
        self.inner
            .read()
            .unwrap()
            .usb_cables
            .get(&serial.to_string())
    }

    pub fn usb_cables(&self) -> Vec<UsbCable> {
        self.inner.read().unwrap().usb_cables.list()
    }

    pub fn subscribe_usb_cables(&self) -> broadcast::Receiver<Change<String>> {
        self.inner.read().unwrap().usb_cables.changes.subscribe()
    }

    /// Whether any stream-bearing entity owns the given VITA stream id.
    /// Used by the stream plane to detect orphan packets.
    pub fn owns_stream(&self, stream_id: u32) -> bool {
        let inner = self.inner.read().unwrap();
        inner.panadapters.entries.contains_key(&stream_id)
            || inner.waterfalls.entries.contains_key(&stream_id)
            || inner.streams.entries.contains_key(&stream_id)
    }

    pub(crate) fn apply_slice(&self, index: u32, kvs: &[(String, String)]) {
        self.inner
            .write()
            .unwrap()
            .slices
            .apply(index, || Slice::new(index), kvs);
    }

    pub(crate) fn remove_slice(&self, index: u32) -> bool {
        self.inner.write().unwrap().slices.remove(&index)
    }

    pub(crate) fn apply_panadapter(&self, stream_id: u32, kvs: &[(String, String)]) {
        self.inner
            .write()
            .unwrap()
            .panadapters
            .apply(stream_id, || Panadapter::new(stream_id), kvs);
    }

    pub(crate) fn remove_panadapter(&self, stream_id: u32) -> bool {
        self.inner.write().unwrap().panadapters.remove(&stream_id)
    }

    pub(crate) fn apply_waterfall(&self, stream_id: u32, kvs: &[(String, String)]) {
        self.inner
            .write()
            .unwrap()
            .waterfalls
            .apply(stream_id, || Waterfall::new(stream_id), kvs);
    }

    pub(crate) fn remove_waterfall(&self, stream_id: u32) -> bool {
        self.inner.write().unwrap().waterfalls.remove(&stream_id)
    }

    pub(crate) fn apply_meter(&self, index: u16, kvs: &[(String, String)]) {
        self.inner
            .write()
            .unwrap()
            .meters
            .apply(index, || Meter::new(index), kvs);
    }

    pub(crate) fn remove_meter(&self, index: u16) -> bool {
        self.inner.write().unwrap().meters.remove(&index)
    }

    pub(crate) fn apply_audio_stream(&self, stream_id: u32, kvs: &[(String, String)]) {
        self.inner
            .write()
            .unwrap()
            .streams
            .apply(stream_id, || AudioStream::new(stream_id), kvs);
    }

    pub(crate) fn remove_audio_stream(&self, stream_id: u32) -> bool {
        self.inner.write().unwrap().streams.remove(&stream_id)
    }

    pub(crate) fn apply_usb_cable(&self, serial: &str, kvs: &[(String, String)]) {
        self.inner.write().unwrap().usb_cables.apply(
            serial.to_string(),
            || UsbCable::new(serial),
            kvs,
        );
    }

    pub(crate) fn remove_usb_cable(&self, serial: &str) -> bool {
        self.inner
            .write()
            .unwrap()
            .usb_cables
            .remove(&serial.to_string())
    }

    pub(crate) fn apply_memory(&self, index: u32, kvs: &[(String, String)]) {
        self.inner
            .write()
            .unwrap()
            .memories
            .apply(index, || Memory::new(index), kvs);
    }

    pub(crate) fn remove_memory(&self, index: u32) -> bool {
        self.inner.write().unwrap().memories.remove(&index)
    }

    /// Records the latest decoded meter reading. Sample traffic flows on
    /// the meter stream channel; no change notification fires here.
    pub(crate) fn record_meter_sample(&self, index: u16, value: f32) {
        if let Some(meter) = self.inner.write().unwrap().meters.entries.get_mut(&index) {
            meter.value = value;
        }
    }

    /// Scale factor lookup for the stream plane: converts a raw meter
    /// sample to engineering units per the meter's definition.
    pub(crate) fn scale_meter_sample(&self, index: u16, raw: i16) -> Option<f32> {
        self.inner
            .read()
            .unwrap()
            .meters
            .entries
            .get(&index)
            .map(|meter| meter.units.scale(raw))
    }

    /// Empties every collection, emitting `Removed` for each entity. Part
    /// of session teardown.
    pub(crate) fn clear(&self) {
        let mut inner = self.inner.write().unwrap();
        inner.slices.clear();
        inner.panadapters.clear();
        inner.waterfalls.clear();
        inner.meters.clear();
        inner.streams.clear();
        inner.usb_cables.clear();
        inner.memories.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use pretty_assertions::assert_eq;

    fn kvs(pairs: &[(&str, &str)]) -> Vec<(String, String)> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn add_update_remove_notifications() {
        let graph = ObjectGraph::new();
        let mut changes = graph.subscribe_slices();

        graph.apply_slice(0, &kvs(&[("rf_frequency", "14.250000")]));
        assert_eq!(changes.try_recv().unwrap(), Change::Added(0));

        graph.apply_slice(0, &kvs(&[("rf_frequency", "7.074000")]));
        assert_eq!(
            changes.try_recv().unwrap(),
            Change::Updated {
                key: 0,
                keys_changed: vec!["rf_frequency".to_string()]
            }
        );

        assert!(graph.remove_slice(0));
        assert_eq!(changes.try_recv().unwrap(), Change::Removed(0));
        assert_eq!(graph.slice(0), None);
    }

    #[test]
    fn reapplying_identical_line_reports_empty_change_set() {
        let graph = ObjectGraph::new();
        let line = kvs(&[("rf_frequency", "14.250000"), ("mode", "USB")]);
        graph.apply_slice(2, &line);

        let mut changes = graph.subscribe_slices();
        graph.apply_slice(2, &line);
        assert_eq!(
            changes.try_recv().unwrap(),
            Change::Updated {
                key: 2,
                keys_changed: vec![]
            }
        );
    }

    #[test]
    fn bad_value_does_not_abort_remaining_keys() {
        let graph = ObjectGraph::new();
        graph.apply_slice(
            1,
            &kvs(&[("rf_frequency", "bogus"), ("audio_gain", "55")]),
        );
        let slice = graph.slice(1).unwrap();
        assert_eq!(slice.freq_mhz, 0.0);
        assert_eq!(slice.audio_gain, 55);
    }

    #[test]
    fn removing_unknown_entity_is_a_no_op() {
        let graph = ObjectGraph::new();
        let mut changes = graph.subscribe_slices();
        assert!(!graph.remove_slice(9));
        assert!(changes.try_recv().is_err());
    }

    #[test]
    fn stream_ownership_spans_collections() {
        let graph = ObjectGraph::new();
        graph.apply_panadapter(0x4000_0001, &[]);
        graph.apply_audio_stream(0x0300_0001, &[]);
        assert!(graph.owns_stream(0x4000_0001));
        assert!(graph.owns_stream(0x0300_0001));
        assert!(!graph.owns_stream(0x4000_0002));
    }

    #[test]
    fn clear_notifies_every_collection() {
        let graph = ObjectGraph::new();
        graph.apply_slice(0, &[]);
        graph.apply_memory(3, &[]);
        let mut slice_changes = graph.subscribe_slices();
        let mut memory_changes = graph.subscribe_memories();

        graph.clear();
        assert_eq!(slice_changes.try_recv().unwrap(), Change::Removed(0));
        assert_eq!(memory_changes.try_recv().unwrap(), Change::Removed(3));
        assert!(graph.slices().is_empty());
        assert!(graph.memories().is_empty());
    }

    #[test]
    fn meter_samples_bypass_notifications() {
        let graph = ObjectGraph::new();
        graph.apply_meter(4, &kvs(&[("nam", "SWR"), ("unit", "swr")]));
        let mut changes = graph.subscribe_meters();

        assert_eq!(graph.scale_meter_sample(4, 256), Some(2.0));
        graph.record_meter_sample(4, 2.0);
        assert_eq!(graph.meter(4).unwrap().value, 2.0);
        assert!(changes.try_recv().is_err());
    }
}
