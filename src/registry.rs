/// Maps case names discovered by a scan to the 2-byte big-endian ids the
/// protocol uses on the wire. Ids are positional (1..N in scan order), so a
/// rescan invalidates every previously issued id, even for unchanged names.
#[derive(Debug, Default)]
pub struct CaseRegistry {
    entries: Vec<(String, [u8; 2])>,
}

impl CaseRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Rebuild the mapping from a scan result. A repeated name keeps a single
    /// entry whose id is the one from its last position (last write wins).
    pub fn assign_ids<S: AsRef<str>>(&mut self, names: &[S]) {
        self.entries.clear();
        for (index, name) in names.iter().enumerate() {
            let name = name.as_ref();
            let id = (index as u16 + 1).to_be_bytes();
            match self.entries.iter_mut().find(|(n, _)| n == name) {
                Some(entry) => entry.1 = id,
                None => self.entries.push((name.to_string(), id)),
            }
        }
    }

    /// Reverse lookup for result frames. Linear scan; a device holds tens of
    /// cases, not thousands.
    pub fn lookup_by_id(&self, id: &[u8; 2]) -> Option<&str> {
        self.entries
            .iter()
            .find(|(_, entry_id)| entry_id == id)
            .map(|(name, _)| name.as_str())
    }

    pub fn id_of(&self, name: &str) -> Option<[u8; 2]> {
        self.entries
            .iter()
            .find(|(entry_name, _)| entry_name == name)
            .map(|(_, id)| *id)
    }

    /// Entries in assignment order, for building run lists.
    pub fn entries(&self) -> impl Iterator<Item = (&str, [u8; 2])> {
        self.entries.iter().map(|(name, id)| (name.as_str(), *id))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
