//! Read a scalar from a named kernel eBPF map.
//!
//! Maps are walked in ascending id order. The first map whose kernel name
//! matches the requested name is read under an all-zero key and the first
//! eight bytes of the value are returned as a native-endian `u64`.
//!
//! The kernel stores at most [`MAP_NAME_LEN`] characters of a map name, so
//! longer requested names are compared on that prefix only.
//!
//! Per-CPU maps hold one value slot per possible CPU. Their reading is the
//! sum of the slots.

use std::io;

use tracing::{debug, warn};

use crate::error::MapLookupError;

/// Significant characters of a kernel map name (`BPF_OBJ_NAME_LEN - 1`).
pub const MAP_NAME_LEN: usize = 15;

/// Per-CPU map types (`BPF_MAP_TYPE_*`).
const PERCPU_MAP_TYPES: [u32; 4] = [
    5,  // PERCPU_HASH
    6,  // PERCPU_ARRAY
    10, // LRU_PERCPU_HASH
    21, // PERCPU_CGROUP_STORAGE
];

/// Metadata of an opened map.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MapInfo {
    pub name: String,
    pub map_type: u32,
    pub key_size: u32,
    pub value_size: u32,
}

impl MapInfo {
    pub fn is_per_cpu(&self) -> bool {
        PERCPU_MAP_TYPES.contains(&self.map_type)
    }

    /// Size of one value slot as the kernel lays it out for lookups.
    fn slot_len(&self) -> usize {
        if self.is_per_cpu() {
            (self.value_size as usize).next_multiple_of(8).max(8)
        } else {
            (self.value_size as usize).max(8)
        }
    }

    /// Bytes a zero-key lookup writes, for `possible_cpus` CPUs.
    pub fn value_buffer_len(&self, possible_cpus: usize) -> usize {
        if self.is_per_cpu() {
            self.slot_len() * possible_cpus.max(1)
        } else {
            self.slot_len()
        }
    }

    /// Reading held in a lookup buffer of [`Self::value_buffer_len`] bytes.
    ///
    /// The first eight bytes of every slot are a native-endian `u64`.
    pub fn read_value(&self, buffer: &[u8]) -> u64 {
        buffer
            .chunks_exact(self.slot_len())
            .map(|slot| {
                let mut word = [0u8; 8];
                word.copy_from_slice(&slot[..8]);
                u64::from_ne_bytes(word)
            })
            .fold(0u64, u64::wrapping_add)
    }
}

/// Number of CPUs in a kernel CPU list such as `0-3,6`.
pub fn parse_cpu_list(list: &str) -> Option<usize> {
    let list = list.trim();
    if list.is_empty() {
        return None;
    }

    let mut count = 0;
    for range in list.split(',') {
        match range.split_once('-') {
            Some((first, last)) => {
                let first: usize = first.trim().parse().ok()?;
                let last: usize = last.trim().parse().ok()?;
                if last < first {
                    return None;
                }
                count += last - first + 1;
            }
            None => {
                range.trim().parse::<usize>().ok()?;
                count += 1;
            }
        }
    }
    Some(count)
}

/// Access to the kernel's map table.
///
/// An opened map is released when its `Map` value is dropped.
pub trait MapSource {
    type Map;

    /// Next map id strictly greater than `after`, `None` past the last one.
    fn next_id(&self, after: u32) -> io::Result<Option<u32>>;

    fn open(&self, id: u32) -> io::Result<Self::Map>;

    fn info(&self, map: &Self::Map) -> io::Result<MapInfo>;

    /// Value stored under the all-zero key.
    fn lookup_zero_key(&self, map: &Self::Map, info: &MapInfo) -> io::Result<u64>;
}

/// The kernel-visible form of `name`.
pub fn kernel_map_name(name: &str) -> &str {
    match name.char_indices().nth(MAP_NAME_LEN) {
        Some((idx, _)) => &name[..idx],
        None => name,
    }
}

/// Find the map called `name` in `source` and read its zero-key value.
///
/// Returns `Ok(None)` when no map has that name.
pub fn lookup_map_value_in<S: MapSource>(
    source: &S,
    name: &str,
) -> Result<Option<u64>, MapLookupError> {
    let wanted = kernel_map_name(name);
    let mut after = 0;

    loop {
        let id = match source.next_id(after) {
            Ok(Some(id)) => id,
            Ok(None) => {
                debug!(map = name, "no kernel map with this name");
                return Ok(None);
            }
            Err(source) => return Err(MapLookupError::Enumerate { after, source }),
        };

        let map = source
            .open(id)
            .map_err(|source| MapLookupError::Open { id, source })?;
        let info = source
            .info(&map)
            .map_err(|source| MapLookupError::Info { id, source })?;

        if info.name == wanted {
            let value = source
                .lookup_zero_key(&map, &info)
                .map_err(|source| MapLookupError::Lookup {
                    name: name.to_string(),
                    source,
                })?;
            debug!(map = name, id, value, "kernel map read");
            return Ok(Some(value));
        }

        after = id;
    }
}

/// Find the kernel map called `name` and read its zero-key value.
pub fn lookup_map_value(name: &str) -> Result<Option<u64>, MapLookupError> {
    lookup_map_value_in(&KernelMaps, name)
}

/// Like [`lookup_map_value`], with a missing map or any failure read as `0`.
pub fn ebpf_map_value(name: &str) -> u64 {
    match lookup_map_value(name) {
        Ok(Some(value)) => value,
        Ok(None) => {
            warn!(map = name, "kernel map not found");
            0
        }
        Err(e) => {
            warn!(map = name, error = %e, "kernel map lookup failed");
            0
        }
    }
}

/// The running kernel, reached through the `bpf(2)` syscall.
#[derive(Debug, Clone, Copy, Default)]
pub struct KernelMaps;

#[cfg(target_os = "linux")]
mod sys {
    use std::io;
    use std::os::fd::{AsRawFd, FromRawFd, OwnedFd};

    use super::{KernelMaps, MapInfo, MapSource, parse_cpu_list};

    const POSSIBLE_CPUS_PATH: &str = "/sys/devices/system/cpu/possible";

    const BPF_MAP_LOOKUP_ELEM: libc::c_long = 1;
    const BPF_MAP_GET_NEXT_ID: libc::c_long = 12;
    const BPF_MAP_GET_FD_BY_ID: libc::c_long = 14;
    const BPF_OBJ_GET_INFO_BY_FD: libc::c_long = 15;

    const BPF_OBJ_NAME_LEN: usize = 16;

    // Shared by GET_NEXT_ID (start_id) and GET_FD_BY_ID (map_id).
    #[repr(C)]
    #[derive(Default)]
    #[allow(dead_code)]
    struct IdAttr {
        id: u32,
        next_id: u32,
        open_flags: u32,
    }

    #[repr(C)]
    #[derive(Default)]
    struct InfoAttr {
        bpf_fd: u32,
        info_len: u32,
        info: u64,
    }

    #[repr(C)]
    #[derive(Default)]
    #[allow(dead_code)]
    struct ElemAttr {
        map_fd: u32,
        _pad: u32,
        key: u64,
        value: u64,
        flags: u64,
    }

    // Leading fields of `struct bpf_map_info`; the kernel copies at most
    // `info_len` bytes.
    #[repr(C)]
    #[derive(Default)]
    #[allow(dead_code)]
    struct RawMapInfo {
        map_type: u32,
        id: u32,
        key_size: u32,
        value_size: u32,
        max_entries: u32,
        map_flags: u32,
        name: [u8; BPF_OBJ_NAME_LEN],
    }

    fn possible_cpus() -> io::Result<usize> {
        let list = std::fs::read_to_string(POSSIBLE_CPUS_PATH)?;
        parse_cpu_list(&list).ok_or_else(|| {
            io::Error::new(
                io::ErrorKind::InvalidData,
                format!("unparsable CPU list in {POSSIBLE_CPUS_PATH}: {list:?}"),
            )
        })
    }

    fn bpf<T>(cmd: libc::c_long, attr: &mut T) -> io::Result<libc::c_long> {
        let ret = unsafe {
            libc::syscall(
                libc::SYS_bpf,
                cmd,
                attr as *mut T as *mut libc::c_void,
                std::mem::size_of::<T>() as libc::c_uint,
            )
        };
        if ret < 0 {
            return Err(io::Error::last_os_error());
        }
        Ok(ret)
    }

    impl MapSource for KernelMaps {
        type Map = OwnedFd;

        fn next_id(&self, after: u32) -> io::Result<Option<u32>> {
            let mut attr = IdAttr {
                id: after,
                ..IdAttr::default()
            };
            match bpf(BPF_MAP_GET_NEXT_ID, &mut attr) {
                Ok(_) => Ok(Some(attr.next_id)),
                Err(e) if e.raw_os_error() == Some(libc::ENOENT) => Ok(None),
                Err(e) => Err(e),
            }
        }

        fn open(&self, id: u32) -> io::Result<OwnedFd> {
            let mut attr = IdAttr {
                id,
                ..IdAttr::default()
            };
            let fd = bpf(BPF_MAP_GET_FD_BY_ID, &mut attr)?;
            // The kernel hands over a fresh descriptor we now own.
            Ok(unsafe { OwnedFd::from_raw_fd(fd as libc::c_int) })
        }

        fn info(&self, map: &OwnedFd) -> io::Result<MapInfo> {
            let mut raw = RawMapInfo::default();
            let mut attr = InfoAttr {
                bpf_fd: map.as_raw_fd() as u32,
                info_len: std::mem::size_of::<RawMapInfo>() as u32,
                info: &mut raw as *mut RawMapInfo as u64,
            };
            bpf(BPF_OBJ_GET_INFO_BY_FD, &mut attr)?;

            let len = raw.name.iter().position(|&b| b == 0).unwrap_or(raw.name.len());
            Ok(MapInfo {
                name: String::from_utf8_lossy(&raw.name[..len]).into_owned(),
                map_type: raw.map_type,
                key_size: raw.key_size,
                value_size: raw.value_size,
            })
        }

        fn lookup_zero_key(&self, map: &OwnedFd, info: &MapInfo) -> io::Result<u64> {
            let key = vec![0u8; info.key_size.max(1) as usize];
            // Per-CPU lookups fill one slot per possible CPU.
            let cpus = if info.is_per_cpu() { possible_cpus()? } else { 1 };
            let mut value = vec![0u8; info.value_buffer_len(cpus)];
            let mut attr = ElemAttr {
                map_fd: map.as_raw_fd() as u32,
                key: key.as_ptr() as u64,
                value: value.as_mut_ptr() as u64,
                ..ElemAttr::default()
            };
            bpf(BPF_MAP_LOOKUP_ELEM, &mut attr)?;

            Ok(info.read_value(&value))
        }
    }
}

#[cfg(not(target_os = "linux"))]
mod sys {
    use std::io;

    use super::{KernelMaps, MapInfo, MapSource};

    fn unsupported() -> io::Error {
        io::Error::new(io::ErrorKind::Unsupported, "eBPF maps require Linux")
    }

    impl MapSource for KernelMaps {
        type Map = ();

        fn next_id(&self, _after: u32) -> io::Result<Option<u32>> {
            Err(unsupported())
        }

        fn open(&self, _id: u32) -> io::Result<()> {
            Err(unsupported())
        }

        fn info(&self, _map: &()) -> io::Result<MapInfo> {
            Err(unsupported())
        }

        fn lookup_zero_key(&self, _map: &(), _info: &MapInfo) -> io::Result<u64> {
            Err(unsupported())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;

    struct FakeMap {
        id: u32,
        name: &'static str,
        value: io::Result<u64>,
    }

    /// In-memory map table that records which ids were opened.
    #[derive(Default)]
    struct FakeMaps {
        maps: Vec<FakeMap>,
        fail_next_id: bool,
        opened: Mutex<Vec<u32>>,
    }

    impl FakeMaps {
        fn with(maps: Vec<FakeMap>) -> Self {
            Self {
                maps,
                ..Self::default()
            }
        }
    }

    fn map(id: u32, name: &'static str, value: u64) -> FakeMap {
        FakeMap {
            id,
            name,
            value: Ok(value),
        }
    }

    impl MapSource for FakeMaps {
        type Map = u32;

        fn next_id(&self, after: u32) -> io::Result<Option<u32>> {
            if self.fail_next_id {
                return Err(io::Error::from_raw_os_error(1));
            }
            Ok(self.maps.iter().map(|m| m.id).filter(|&id| id > after).min())
        }

        fn open(&self, id: u32) -> io::Result<u32> {
            self.opened.lock().push(id);
            Ok(id)
        }

        fn info(&self, map: &u32) -> io::Result<MapInfo> {
            let entry = self.maps.iter().find(|m| m.id == *map).unwrap();
            Ok(MapInfo {
                name: kernel_map_name(entry.name).to_string(),
                map_type: 2,
                key_size: 4,
                value_size: 8,
            })
        }

        fn lookup_zero_key(&self, map: &u32, _info: &MapInfo) -> io::Result<u64> {
            let entry = self.maps.iter().find(|m| m.id == *map).unwrap();
            match &entry.value {
                Ok(v) => Ok(*v),
                Err(e) => Err(io::Error::new(e.kind(), e.to_string())),
            }
        }
    }

    #[test]
    fn test_kernel_map_name_truncates() {
        assert_eq!(kernel_map_name("rl_drop_count_map"), "rl_drop_count_m");
        assert_eq!(kernel_map_name("short"), "short");
        assert_eq!(kernel_map_name("exactly_15_char"), "exactly_15_char");
    }

    #[test]
    fn test_lookup_finds_value_by_truncated_name() {
        let maps = FakeMaps::with(vec![
            map(3, "xdp_stats_map", 11),
            map(7, "rl_drop_count_map", 42),
        ]);

        let value = lookup_map_value_in(&maps, "rl_drop_count_map").unwrap();
        assert_eq!(value, Some(42));
        assert_eq!(*maps.opened.lock(), vec![3, 7]);
    }

    #[test]
    fn test_lookup_stops_at_first_match() {
        let maps = FakeMaps::with(vec![
            map(2, "rl_recv_count_map", 5),
            map(9, "rl_recv_count_map", 6),
        ]);

        assert_eq!(lookup_map_value_in(&maps, "rl_recv_count_map").unwrap(), Some(5));
        assert_eq!(*maps.opened.lock(), vec![2]);
    }

    #[test]
    fn test_lookup_missing_map_is_none() {
        let maps = FakeMaps::with(vec![map(1, "xdp_stats_map", 11)]);
        assert_eq!(lookup_map_value_in(&maps, "no_such_map").unwrap(), None);
    }

    #[test]
    fn test_lookup_zero_value_is_some() {
        let maps = FakeMaps::with(vec![map(1, "rl_drop_count_map", 0)]);
        assert_eq!(lookup_map_value_in(&maps, "rl_drop_count_map").unwrap(), Some(0));
    }

    #[test]
    fn test_lookup_enumeration_error() {
        let maps = FakeMaps {
            fail_next_id: true,
            ..FakeMaps::default()
        };
        let err = lookup_map_value_in(&maps, "rl_drop_count_map").unwrap_err();
        assert!(matches!(err, MapLookupError::Enumerate { after: 0, .. }));
    }

    #[test]
    fn test_lookup_read_error() {
        let maps = FakeMaps::with(vec![FakeMap {
            id: 4,
            name: "rl_drop_count_map",
            value: Err(io::Error::from(io::ErrorKind::NotFound)),
        }]);
        let err = lookup_map_value_in(&maps, "rl_drop_count_map").unwrap_err();
        assert!(matches!(
            err,
            MapLookupError::Lookup { ref name, .. } if name == "rl_drop_count_map"
        ));
    }

    fn info(map_type: u32, value_size: u32) -> MapInfo {
        MapInfo {
            name: "rl_drop_count_m".to_string(),
            map_type,
            key_size: 4,
            value_size,
        }
    }

    #[test]
    fn test_plain_map_buffer_holds_one_value() {
        let array = info(2, 8);
        assert!(!array.is_per_cpu());
        assert_eq!(array.value_buffer_len(64), 8);

        let narrow = info(1, 4);
        assert_eq!(narrow.value_buffer_len(64), 8);
        assert_eq!(narrow.read_value(&[7, 0, 0, 0, 0, 0, 0, 0]), 7);
    }

    #[test]
    fn test_per_cpu_buffer_covers_every_cpu() {
        for map_type in [5, 6, 10, 21] {
            let percpu = info(map_type, 8);
            assert!(percpu.is_per_cpu());
            assert_eq!(percpu.value_buffer_len(4), 32);
        }

        // Slots are rounded up to 8 bytes.
        assert_eq!(info(6, 12).value_buffer_len(3), 48);
        assert_eq!(info(6, 4).value_buffer_len(2), 16);
    }

    #[test]
    fn test_per_cpu_value_is_summed() {
        let percpu = info(6, 8);
        let mut buffer = Vec::new();
        for per_cpu in [3u64, 4, 0, 35] {
            buffer.extend_from_slice(&per_cpu.to_ne_bytes());
        }
        assert_eq!(buffer.len(), percpu.value_buffer_len(4));
        assert_eq!(percpu.read_value(&buffer), 42);
    }

    #[test]
    fn test_per_cpu_wide_slots_read_leading_word() {
        let percpu = info(5, 16);
        let mut buffer = vec![0u8; percpu.value_buffer_len(2)];
        buffer[..8].copy_from_slice(&5u64.to_ne_bytes());
        buffer[8..16].copy_from_slice(&u64::MAX.to_ne_bytes());
        buffer[16..24].copy_from_slice(&6u64.to_ne_bytes());
        assert_eq!(percpu.read_value(&buffer), 11);
    }

    #[test]
    fn test_parse_cpu_list() {
        assert_eq!(parse_cpu_list("0\n"), Some(1));
        assert_eq!(parse_cpu_list("0-7\n"), Some(8));
        assert_eq!(parse_cpu_list("0-3,6,8-9"), Some(7));
        assert_eq!(parse_cpu_list(""), None);
        assert_eq!(parse_cpu_list("3-1"), None);
        assert_eq!(parse_cpu_list("a-b"), None);
    }

    #[test]
    fn test_ebpf_map_value_missing_is_zero() {
        // Holds without privileges too: enumeration fails and reads as zero.
        assert_eq!(ebpf_map_value("nfstats_no_such_map_in_kernel"), 0);
    }
}
