//! Deduplicated table of every tag seen since the last clear

use serde::Serialize;

use log::{info, warn};

use crate::names::NameStore;
use crate::report::TagReport;
use crate::types::TrackerError;

/// Unique tags tracked between clears
pub const DEFAULT_REGISTRY_CAPACITY: usize = 50;

/// The powder station has a single antenna
const ANTENNA_ID: u8 = 1;

/// One physical tag
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TagRecord {
    pub epc: String,
    pub protocol_control: String,
    pub crc: String,
    /// RSSI of the latest read, in dBm
    pub rssi: i16,
    pub read_count: u32,
    pub antenna_id: u8,
    /// Milliseconds since the station started
    pub last_seen: u64,
    /// Empty when the bottle has not been registered
    pub friendly_name: String,
}

/// Outcome of feeding one report into the registry
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RegistryEvent {
    /// First sighting, stored at this index
    NewTag(usize),
    /// Known tag at this index was updated
    UpdatedTag(usize),
    /// Registry is full; the report was not stored
    Dropped,
}

#[derive(Debug)]
pub struct TagRegistry {
    records: Vec<TagRecord>,
    capacity: usize,
}

impl Default for TagRegistry {
    fn default() -> Self {
        Self::new(DEFAULT_REGISTRY_CAPACITY)
    }
}

impl TagRegistry {
    pub fn new(capacity: usize) -> Self {
        Self {
            records: Vec::with_capacity(capacity),
            capacity,
        }
    }

    /// Record a sighting taken at `now_ms`.
    ///
    /// `names` is only consulted on the first sighting of an EPC.
    pub fn observe<N: NameStore + ?Sized>(
        &mut self,
        report: &TagReport,
        names: &N,
        now_ms: u64,
    ) -> RegistryEvent {
        if let Some(index) = self.position(&report.epc) {
            let record = &mut self.records[index];
            record.rssi = report.rssi;
            record.read_count += 1;
            record.last_seen = now_ms;
            return RegistryEvent::UpdatedTag(index);
        }

        if self.is_full() {
            warn!(
                "Tag registry full ({} tags), not tracking {}",
                self.capacity, report.epc
            );
            return RegistryEvent::Dropped;
        }

        self.records.push(TagRecord {
            epc: report.epc.clone(),
            protocol_control: report.protocol_control.clone(),
            crc: report.crc.clone(),
            rssi: report.rssi,
            read_count: 1,
            antenna_id: ANTENNA_ID,
            last_seen: now_ms,
            friendly_name: names.get(&report.epc).unwrap_or_default(),
        });
        info!("New unique tag #{}: {}", self.records.len(), report.epc);
        RegistryEvent::NewTag(self.records.len() - 1)
    }

    /// Name `epc`, in memory if it is tracked and in `names` unconditionally
    pub fn rename<N: NameStore + ?Sized>(
        &mut self,
        epc: &str,
        name: &str,
        names: &mut N,
    ) -> Result<(), TrackerError> {
        names.put(epc, name)?;
        if let Some(index) = self.position(epc) {
            self.records[index].friendly_name = name.to_string();
            info!("Updated tag #{} with name: {}", index + 1, name);
        }
        Ok(())
    }

    /// Forget every tag; persisted names are kept
    pub fn reset(&mut self) {
        self.records.clear();
    }

    pub fn get(&self, epc: &str) -> Option<&TagRecord> {
        self.position(epc).map(|index| &self.records[index])
    }

    pub fn record(&self, index: usize) -> Option<&TagRecord> {
        self.records.get(index)
    }

    pub fn records(&self) -> &[TagRecord] {
        &self.records
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn is_full(&self) -> bool {
        self.records.len() >= self.capacity
    }

    // Linear scan: capacity is small and fixed.
    fn position(&self, epc: &str) -> Option<usize> {
        self.records.iter().position(|r| r.epc == epc)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::names::MemoryNameStore;

    fn report(epc: &str, rssi: i16) -> TagReport {
        TagReport {
            rssi,
            protocol_control: "3400".into(),
            epc: epc.into(),
            crc: "3A76".into(),
        }
    }

    #[test]
    fn test_repeated_reads_share_one_record() {
        let names = MemoryNameStore::new();
        let mut registry = TagRegistry::default();

        assert_eq!(registry.observe(&report("AAAA", -60), &names, 10), RegistryEvent::NewTag(0));
        for n in 2..=7u64 {
            assert_eq!(
                registry.observe(&report("AAAA", -50 - n as i16), &names, n * 10),
                RegistryEvent::UpdatedTag(0)
            );
        }

        assert_eq!(registry.len(), 1);
        let record = registry.get("AAAA").unwrap();
        assert_eq!(record.read_count, 7);
        assert_eq!(record.rssi, -57);
        assert_eq!(record.last_seen, 70);
        assert_eq!(record.antenna_id, 1);
    }

    #[test]
    fn test_full_registry_drops_new_tags() {
        let names = MemoryNameStore::new();
        let mut registry = TagRegistry::new(2);

        assert_eq!(registry.observe(&report("X", -40), &names, 0), RegistryEvent::NewTag(0));
        assert_eq!(registry.observe(&report("Y", -40), &names, 0), RegistryEvent::NewTag(1));
        assert_eq!(registry.observe(&report("Z", -40), &names, 0), RegistryEvent::Dropped);

        let epcs: Vec<&str> = registry.records().iter().map(|r| r.epc.as_str()).collect();
        assert_eq!(epcs, ["X", "Y"]);

        // Known tags still update once full.
        assert_eq!(registry.observe(&report("Y", -41), &names, 5), RegistryEvent::UpdatedTag(1));
    }

    #[test]
    fn test_name_resolved_on_first_sighting() {
        let mut names = MemoryNameStore::new();
        names.put("30751FEB705C5904E3D50D70", "Ti64").unwrap();
        let mut registry = TagRegistry::default();

        registry.observe(&report("30751FEB705C5904E3D50D70", -50), &names, 0);
        registry.observe(&report("E2000000000000000000BEEF", -50), &names, 0);

        assert_eq!(registry.record(0).unwrap().friendly_name, "Ti64");
        assert_eq!(registry.record(1).unwrap().friendly_name, "");
    }

    #[test]
    fn test_rename_persists_even_when_tag_absent() {
        let mut names = MemoryNameStore::new();
        let mut registry = TagRegistry::default();

        registry.rename("ABCDEF0123456789ABCDEF01", "316L", &mut names).unwrap();
        assert!(registry.is_empty());
        assert_eq!(names.get("ABCDEF0123456789ABCDEF01").as_deref(), Some("316L"));

        registry.observe(&report("ABCDEF0123456789ABCDEF01", -50), &names, 0);
        assert_eq!(registry.record(0).unwrap().friendly_name, "316L");
    }

    #[test]
    fn test_rename_updates_tracked_record() {
        let mut names = MemoryNameStore::new();
        let mut registry = TagRegistry::default();
        registry.observe(&report("ABCDEF0123456789ABCDEF01", -50), &names, 0);

        registry.rename("ABCDEF0123456789ABCDEF01", "Cu", &mut names).unwrap();
        assert_eq!(registry.record(0).unwrap().friendly_name, "Cu");
    }

    #[test]
    fn test_reset_keeps_persisted_names() {
        let mut names = MemoryNameStore::new();
        let mut registry = TagRegistry::default();
        registry.observe(&report("ABCDEF0123456789ABCDEF01", -50), &names, 0);
        registry.rename("ABCDEF0123456789ABCDEF01", "Cu", &mut names).unwrap();

        registry.reset();
        assert!(registry.is_empty());
        assert_eq!(names.get("ABCDEF0123456789ABCDEF01").as_deref(), Some("Cu"));

        assert_eq!(
            registry.observe(&report("ABCDEF0123456789ABCDEF01", -50), &names, 0),
            RegistryEvent::NewTag(0)
        );
        assert_eq!(registry.record(0).unwrap().friendly_name, "Cu");
    }
}
