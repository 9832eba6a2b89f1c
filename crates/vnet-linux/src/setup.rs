#[cfg(target_os = "linux")]
use std::process::Command;

use log::info;
use vnet_core::MacAddr;

#[cfg(target_os = "linux")]
fn ip(args: &[&str]) -> anyhow::Result<()> {
    let status = Command::new("ip").args(args).status()?;
    if !status.success() {
        anyhow::bail!("ip {} failed: {}", args.join(" "), status);
    }
    Ok(())
}

/// Set the hardware address of `iface`.
#[cfg(target_os = "linux")]
pub fn set_link_address(iface: &str, mac: MacAddr) -> anyhow::Result<()> {
    info!("setting {} address to {}", iface, mac);
    ip(&["link", "set", "dev", iface, "address", &mac.to_string()])
}

#[cfg(target_os = "linux")]
pub fn link_up(iface: &str) -> anyhow::Result<()> {
    ip(&["link", "set", "dev", iface, "up"])
}

/// Give the host-only interface its address and bring it up.
#[cfg(target_os = "linux")]
pub fn configure_host_only(iface: &str, cidr: &str) -> anyhow::Result<()> {
    info!("configuring {} as {}", iface, cidr);
    ip(&["addr", "replace", cidr, "dev", iface])?;
    link_up(iface)
}

#[cfg(not(target_os = "linux"))]
pub fn set_link_address(_iface: &str, _mac: MacAddr) -> anyhow::Result<()> {
    Ok(())
}

#[cfg(not(target_os = "linux"))]
pub fn link_up(_iface: &str) -> anyhow::Result<()> {
    Ok(())
}

#[cfg(not(target_os = "linux"))]
pub fn configure_host_only(_iface: &str, _cidr: &str) -> anyhow::Result<()> {
    info!("skipping host-only configuration (not on Linux)");
    Ok(())
}
