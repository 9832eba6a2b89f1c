use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use clap::Parser;
use log::{debug, info, warn};
use vnet_core::{Packet, HUB_PORTS, MAX_QUEUED_FRAME_LEN, USERIF_QUEUE_LEN};
use vnet_hal::{HostDevice, HostStack};
use vnet_linux::{wait_readable, LinuxClock, SysDeviceRegistry, TapStack};
use vnet_switch::{netif_addr, HubId, Switch, SwitchConfig};

#[derive(Parser)]
#[command(about = "Virtual Ethernet hub with a host-only adapter and an optional bridged NIC")]
struct Cli {
    /// Virtual network number of the hub.
    #[arg(long, default_value_t = 1)]
    hub: u32,
    /// Name of the host-only TAP interface.
    #[arg(long, default_value = "vnet%d")]
    tap: String,
    /// Address for the host-only interface, e.g. 192.168.56.1/24.
    #[arg(long)]
    address: Option<String>,
    /// Host interface to bridge onto the hub.
    #[arg(long)]
    bridge: Option<String>,
    /// Substitute MAC addresses even on a wired uplink.
    #[arg(long)]
    force_smac: bool,
    /// Forward frames whose destination is not in the substitution table.
    #[arg(long)]
    forward_unknown: bool,
    #[arg(long, default_value_t = HUB_PORTS)]
    hub_ports: usize,
    #[arg(long, default_value_t = USERIF_QUEUE_LEN)]
    queue_len: usize,
    /// Seconds between status reports; 0 disables them.
    #[arg(long, default_value_t = 0)]
    status_interval: u64,
}

impl Cli {
    fn switch_config(&self) -> SwitchConfig {
        SwitchConfig {
            hub_ports: self.hub_ports,
            userif_queue_len: self.queue_len,
            listener_queue_len: self.queue_len,
            smac_forward_unknown: self.forward_unknown,
        }
    }
}

fn main() -> anyhow::Result<()> {
    env_logger::init();
    let cli = Cli::parse();
    info!("vnet-hub {} on hub{}", env!("CARGO_PKG_VERSION"), cli.hub);

    let registry = Arc::new(SysDeviceRegistry::new());
    let switch = Switch::new(cli.switch_config(), registry.clone(), Arc::new(LinuxClock::new()));
    let hub = HubId::Vnet(cli.hub);

    let tap = Arc::new(TapStack::open(&cli.tap, netif_addr(hub.number()))?);
    if let Some(cidr) = &cli.address {
        vnet_linux::setup::configure_host_only(tap.name(), cidr)?;
    }
    let netif = switch.attach_netif(hub, tap.clone())?;

    let bridge = match &cli.bridge {
        Some(name) => Some(switch.attach_bridge(hub, name, cli.force_smac)?),
        None => None,
    };
    let device = cli.bridge.as_deref().and_then(|name| registry.device(name));

    let running = Arc::new(AtomicBool::new(true));
    let r = running.clone();
    ctrlc::set_handler(move || {
        warn!("Signal received. Stopping...");
        r.store(false, Ordering::SeqCst);
    })?;

    match &cli.bridge {
        Some(name) => info!("hub{} active: host-only {}, bridged to {}", cli.hub, tap.name(), name),
        None => info!("hub{} active: host-only {}", cli.hub, tap.name()),
    }

    let mut buf = vec![0u8; MAX_QUEUED_FRAME_LEN];
    let mut last_report = Instant::now();
    let report_every = Duration::from_secs(cli.status_interval);

    while running.load(Ordering::SeqCst) {
        let mut fds = vec![tap.fd()];
        fds.extend(device.as_ref().and_then(|d| d.raw_fd()));
        wait_readable(&fds, 100)?;

        // Host-only: host stack to fabric.
        loop {
            match tap.read_frame(&mut buf) {
                Ok(n) => {
                    if let Err(e) = netif.transmit_from_host(Packet::from_slice(&buf[..n])) {
                        debug!("{}: {}", tap.name(), e);
                    }
                }
                Err(nb::Error::WouldBlock) => break,
                Err(nb::Error::Other(e)) => {
                    warn!("{}: read failed: {}", tap.name(), e);
                    break;
                }
            }
        }

        if let (Some(bridge), Some(device)) = (&bridge, &device) {
            device.pump(&mut buf);
            // No link notifications from sysfs; poll the flags instead.
            let up = device.is_up();
            if up != bridge.is_up() {
                info!("{} is now {}", device.name(), if up { "up" } else { "down" });
                bridge.device_state_changed(up);
            }
        }

        if cli.status_interval > 0 && last_report.elapsed() >= report_every {
            for line in switch.status_report().lines() {
                info!("{}", line);
            }
            last_report = Instant::now();
        }
    }

    drop(bridge);
    drop(netif);
    info!("hub{} stopped", cli.hub);
    Ok(())
}
