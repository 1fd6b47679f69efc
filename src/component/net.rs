//! Network interface statistics from `/proc/net/dev`.
//!
//! Natives are named `<interface>:<counter>` and count from the start of the EventSet.

use crate::component::*;
use log::debug;
use std::collections::HashMap;
use std::io::{BufRead, BufReader};
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Default location of the interface statistics.
pub const PROC_NET_DEV: &str = "/proc/net/dev";

/// Columns of `/proc/net/dev`, in file order.
const COUNTERS: [(&str, &str); 16] = [
    ("RX_BYTES", "Number of bytes received"),
    ("RX_PACKETS", "Number of packets received"),
    ("RX_ERRORS", "Number of receive errors"),
    ("RX_DROPPED", "Number of received packets dropped"),
    ("RX_FIFO", "Number of receive FIFO buffer errors"),
    ("RX_FRAME", "Number of receive framing errors"),
    ("RX_COMPRESSED", "Number of compressed packets received"),
    ("RX_MULTICAST", "Number of multicast frames received"),
    ("TX_BYTES", "Number of bytes transmitted"),
    ("TX_PACKETS", "Number of packets transmitted"),
    ("TX_ERRORS", "Number of transmit errors"),
    ("TX_DROPPED", "Number of transmitted packets dropped"),
    ("TX_FIFO", "Number of transmit FIFO buffer errors"),
    ("TX_COLLS", "Number of collisions detected"),
    ("TX_CARRIER", "Number of carrier losses detected"),
    ("TX_COMPRESSED", "Number of compressed packets transmitted"),
];

/// Parse the statistics of every interface.
fn _parse_net_dev<P: AsRef<Path>>(path: P) -> Result<Vec<(String, Vec<i64>)>> {
    let file = std::fs::File::open(path)?;
    let mut out = vec![];
    // Skip the two header lines.
    for line in BufReader::new(file).lines().skip(2) {
        let line = line?;
        let mut split = line.splitn(2, ':');
        let (iface, stats) = match (split.next(), split.next()) {
            (Some(i), Some(s)) => (i.trim().to_string(), s),
            _ => continue,
        };
        let values = stats
            .split_whitespace()
            .map(|v| v.parse::<i64>())
            .collect::<std::result::Result<Vec<i64>, _>>()?;
        if values.len() < COUNTERS.len() {
            return Err(Error::Invalid);
        }
        out.push((iface, values));
    }
    Ok(out)
}

#[derive(Debug, Clone)]
struct NetNative {
    name: String,
    desc: String,
    iface: String,
    counter: usize,
}

/// The net component.
#[derive(Debug)]
pub struct NetComponent {
    info: ComponentInfo,
    path: PathBuf,
    natives: Arc<Vec<NetNative>>,
}

impl Default for NetComponent {
    fn default() -> Self {
        NetComponent::with_path(PROC_NET_DEV)
    }
}

impl NetComponent {
    /// Component reading statistics from `path` instead of the default location.
    pub fn with_path<P: AsRef<Path>>(path: P) -> Self {
        NetComponent {
            info: ComponentInfo {
                name: "net".into(),
                short_name: "net".into(),
                description: "Linux network driver statistics".into(),
                default_domain: Domain::ALL,
                available_domains: Domain::ALL,
                default_granularity: Granularity::SYS,
                available_granularities: Granularity::SYS,
                ..ComponentInfo::default()
            },
            path: path.as_ref().to_path_buf(),
            natives: Arc::new(vec![]),
        }
    }
}

impl Component for NetComponent {
    fn info(&self) -> &ComponentInfo {
        &self.info
    }

    fn info_mut(&mut self) -> &mut ComponentInfo {
        &mut self.info
    }

    fn init_component(&mut self, cidx: usize) -> Result<()> {
        let mut natives = vec![];
        for (iface, _) in _parse_net_dev(&self.path)? {
            for (counter, (name, desc)) in COUNTERS.iter().enumerate() {
                natives.push(NetNative {
                    name: format!("{}:{}", iface, name),
                    desc: format!("{} ({})", desc, iface),
                    iface: iface.clone(),
                    counter,
                });
            }
        }
        if natives.is_empty() {
            return Err(Error::NotSupported);
        }
        debug!("net component with {} natives", natives.len());
        self.info.cmp_index = cidx;
        self.info.num_cntrs = natives.len();
        self.info.num_mpx_cntrs = natives.len();
        self.natives = Arc::new(natives);
        Ok(())
    }

    fn num_native_events(&self) -> usize {
        self.natives.len()
    }

    fn native_info(&self, code: u32) -> Result<NativeEventInfo> {
        let n = self.natives.get(code as usize).ok_or(Error::NoEvent)?;
        Ok(NativeEventInfo {
            code,
            symbol: n.name.clone(),
            description: n.desc.clone(),
            units: if COUNTERS[n.counter].0.ends_with("BYTES") {
                "bytes".into()
            } else {
                String::default()
            },
            data_type: DataType::Int64,
            writable: false,
        })
    }

    fn new_control_state(&self) -> Result<Box<dyn ControlState>> {
        Ok(Box::new(NetControlState {
            path: self.path.clone(),
            natives: self.natives.clone(),
            programmed: vec![],
            start_values: vec![],
        }))
    }
}

/// Interface counters read by one EventSet.
#[derive(Debug)]
pub struct NetControlState {
    path: PathBuf,
    natives: Arc<Vec<NetNative>>,
    programmed: Vec<u32>,
    start_values: Vec<i64>,
}

impl NetControlState {
    fn _read_raw(&self) -> Result<Vec<i64>> {
        let stats: HashMap<String, Vec<i64>> = _parse_net_dev(&self.path)?.into_iter().collect();
        Ok(self
            .programmed
            .iter()
            .map(|&c| {
                let n = &self.natives[c as usize];
                // A vanished interface reads as zero.
                stats.get(&n.iface).map(|v| v[n.counter]).unwrap_or(0)
            })
            .collect())
    }
}

impl ControlState for NetControlState {
    fn update(&mut self, natives: &mut [NativeSlot]) -> Result<()> {
        if natives.iter().any(|n| n.code as usize >= self.natives.len()) {
            return Err(Error::NoEvent);
        }
        self.programmed = natives.iter().map(|n| n.code).collect();
        self.start_values = vec![0; natives.len()];
        for (pos, n) in natives.iter_mut().enumerate() {
            n.position = Some(pos);
        }
        Ok(())
    }

    fn start(&mut self) -> Result<()> {
        self.start_values = self._read_raw()?;
        Ok(())
    }

    fn stop(&mut self) -> Result<()> {
        Ok(())
    }

    fn read(&mut self) -> Result<Vec<i64>> {
        Ok(self
            ._read_raw()?
            .iter()
            .zip(self.start_values.iter())
            .map(|(now, start)| now - start)
            .collect())
    }

    fn reset(&mut self) -> Result<()> {
        self.start()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const HEADER: &str = "Inter-|   Receive                                                |  Transmit\n \
face |bytes    packets errs drop fifo frame compressed multicast|bytes    packets errs drop fifo colls carrier compressed\n";

    fn _write(path: &Path, lo_rx: i64, eth_tx: i64) {
        std::fs::write(
            path,
            format!(
                "{}    lo: {} 10 0 0 0 0 0 0 {} 10 0 0 0 0 0 0\n  eth0: 900 5 0 0 0 0 0 0 {} 7 0 0 0 0 0 0\n",
                HEADER, lo_rx, lo_rx, eth_tx
            ),
        )
        .unwrap();
    }

    #[test]
    fn test_interfaces_become_natives() {
        let path = std::env::temp_dir().join(format!("papi-netdev-{}", std::process::id()));
        _write(&path, 1000, 50);
        let mut cmp = NetComponent::with_path(&path);
        cmp.init_component(4).unwrap();
        assert_eq!(cmp.num_native_events(), 2 * 16);
        let rx = cmp.name_to_native("lo:RX_BYTES").unwrap();
        let tx = cmp.name_to_native("eth0:TX_BYTES").unwrap();
        assert_eq!(cmp.native_info(rx).unwrap().units, "bytes");
        assert!(cmp.name_to_native("eth0:TX_COLLS").is_ok());

        let mut cs = cmp.new_control_state().unwrap();
        let mut slots = vec![NativeSlot::new(rx), NativeSlot::new(tx)];
        cs.update(&mut slots).unwrap();
        cs.start().unwrap();
        assert_eq!(cs.read().unwrap(), vec![0, 0]);
        _write(&path, 1600, 80);
        assert_eq!(cs.read().unwrap(), vec![600, 30]);
        cs.reset().unwrap();
        assert_eq!(cs.read().unwrap(), vec![0, 0]);
        let _ = std::fs::remove_file(&path);
    }

    #[test]
    fn test_real_proc_net_dev() {
        if Path::new(PROC_NET_DEV).exists() {
            let stats = _parse_net_dev(PROC_NET_DEV).unwrap();
            assert!(stats.iter().all(|(_, v)| v.len() >= 16));
        }
    }
}
