// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Discovery of connected servo devices through the servo-host's sysfs tree.
//!
//! `servodtool` resolves a servo serial number to its device directory under
//! `/sys/bus/usb/devices`; dropping the final dotted segment of that
//! directory's base name yields the servo hub, and every sibling directory
//! under the hub that carries a `serial` file is a connected servo device.
//! All reads are remote shell commands through a [`Runner`], so tests inject
//! a fake filesystem at that seam.

use crate::error::TopologyError;
use crate::ssh::Runner;
use camino::Utf8Path;
use camino::Utf8PathBuf;
use recovery_types::device;
use recovery_types::ServoTopology;
use recovery_types::ServoTopologyItem;
use slog::debug;
use slog::info;
use slog::Logger;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// Base of the sysfs USB device tree on the servo-host.
pub const SYSFS_USB_DEVICES: &str = "/sys/bus/usb/devices";

// A valid device path is at least `<base>/X`.
const MIN_SERVO_PATH_LEN: usize = SYSFS_USB_DEVICES.len() + "/X".len();

const FILE_READ_TIMEOUT: Duration = Duration::from_secs(20);
const COMMAND_TIMEOUT: Duration = Duration::from_secs(60);

const SERIAL_FILE: &str = "serial";
const VENDOR_ID_FILE: &str = "idVendor";
const PRODUCT_ID_FILE: &str = "idProduct";
const PRODUCT_FILE: &str = "product";
const CONFIGURATION_FILE: &str = "configuration";
const HUB_PORT_FILE: &str = "devpath";
const DEVNUM_FILE: &str = "devnum";

/// Fixed classification of USB vendor:product pairs to servo device types.
const VID_PID_DEVICE_TYPES: &[(&str, &str)] = &[
    ("18d1:501b", device::SERVO_V4),
    ("18d1:520d", device::SERVO_V4P1),
    ("18d1:5014", device::CCD_CR50),
    ("18d1:504a", device::CCD_GSC),
    ("18d1:501a", device::SERVO_MICRO),
    ("18d1:5041", device::C2D2),
    ("18d1:5020", device::SWEETBERRY),
];

fn device_type_from_vid_pid(vid_pid: &str) -> Result<&'static str, TopologyError> {
    if vid_pid.is_empty() {
        return Err(TopologyError::EmptyVidPid);
    }
    VID_PID_DEVICE_TYPES
        .iter()
        .find(|(pair, _)| *pair == vid_pid)
        .map(|(_, device_type)| *device_type)
        .ok_or_else(|| TopologyError::UnknownVidPid {
            vid_pid: vid_pid.to_string(),
        })
}

/// Resolve the sysfs directory of the root servo with the given serial.
pub async fn root_servo_path(
    runner: &dyn Runner,
    cancel: &CancellationToken,
    serial: &str,
) -> Result<Utf8PathBuf, TopologyError> {
    let command = format!("servodtool device -s {serial} usb-path");
    let path = runner
        .run(cancel, COMMAND_TIMEOUT, &command)
        .await
        .map_err(|_| TopologyError::ServoNotDetected { serial: serial.to_string() })?;
    if path.len() < MIN_SERVO_PATH_LEN {
        return Err(TopologyError::ServoNotDetected {
            serial: serial.to_string(),
        });
    }
    Ok(Utf8PathBuf::from(path))
}

async fn read_device_file(
    runner: &dyn Runner,
    cancel: &CancellationToken,
    device_path: &Utf8Path,
    file: &str,
) -> Result<String, TopologyError> {
    let full = device_path.join(file);
    Ok(runner.run(cancel, FILE_READ_TIMEOUT, &format!("cat {full}")).await?)
}

/// Read one device directory into a topology item. Individual file-read
/// failures are logged and leave the corresponding field empty; goodness is
/// judged later by the caller.
pub async fn read_device_info(
    runner: &dyn Runner,
    cancel: &CancellationToken,
    device_path: &Utf8Path,
    log: &Logger,
) -> ServoTopologyItem {
    let mut item = ServoTopologyItem {
        sysfs_path: device_path.to_string(),
        ..Default::default()
    };
    match read_device_file(runner, cancel, device_path, SERIAL_FILE).await {
        Ok(serial) => item.serial = serial,
        Err(err) => debug!(log, "read device info"; "err" => %err),
    }
    match read_vid_pid(runner, cancel, device_path).await {
        Ok(vid_pid) => match device_type_from_vid_pid(&vid_pid) {
            Ok(device_type) => item.device_type = device_type.to_string(),
            Err(err) => debug!(log, "read device info"; "err" => %err),
        },
        Err(err) => debug!(log, "read device info"; "err" => %err),
    }
    match read_device_file(runner, cancel, device_path, HUB_PORT_FILE).await {
        Ok(hub_port) => item.usb_hub_port = hub_port,
        Err(err) => debug!(log, "read device info"; "err" => %err),
    }
    match read_device_file(runner, cancel, device_path, CONFIGURATION_FILE).await
    {
        Ok(fw) => item.fw_version = fw,
        Err(err) => debug!(log, "read device info"; "err" => %err),
    }
    match read_device_file(runner, cancel, device_path, PRODUCT_FILE).await {
        Ok(product) => item.sysfs_product = product,
        Err(err) => debug!(log, "read device info"; "err" => %err),
    }
    debug!(log, "read device info"; "item" => %item);
    item
}

async fn read_vid_pid(
    runner: &dyn Runner,
    cancel: &CancellationToken,
    device_path: &Utf8Path,
) -> Result<String, TopologyError> {
    let vid =
        read_device_file(runner, cancel, device_path, VENDOR_ID_FILE).await?;
    let pid =
        read_device_file(runner, cancel, device_path, PRODUCT_ID_FILE).await?;
    Ok(format!("{vid}:{pid}"))
}

/// Re-read one device's firmware version from its sysfs `configuration`
/// file, updating the item in place.
pub async fn reread_fw_version(
    runner: &dyn Runner,
    cancel: &CancellationToken,
    item: &mut ServoTopologyItem,
) -> Result<(), TopologyError> {
    let fw = read_device_file(
        runner,
        cancel,
        Utf8Path::new(&item.sysfs_path),
        CONFIGURATION_FILE,
    )
    .await?;
    item.fw_version = fw;
    Ok(())
}

/// Fetch the topology item for the root servo with the given serial.
pub async fn root_servo(
    runner: &dyn Runner,
    cancel: &CancellationToken,
    serial: &str,
    log: &Logger,
) -> Result<ServoTopologyItem, TopologyError> {
    let path = root_servo_path(runner, cancel, serial).await?;
    Ok(read_device_info(runner, cancel, &path, log).await)
}

/// Current USB devnum of the root servo, used to verify a power cycle
/// actually re-enumerated the device.
pub async fn servo_usb_devnum(
    runner: &dyn Runner,
    cancel: &CancellationToken,
    serial: &str,
) -> Result<String, TopologyError> {
    let path = root_servo_path(runner, cancel, serial).await?;
    Ok(read_device_file(runner, cancel, &path, DEVNUM_FILE).await?)
}

/// The hub directory is the root servo's directory with the final dotted
/// segment of its base name dropped: `B/1-3.2.1` hangs off hub `B/1-3.2`.
fn servo_hub_path(root_servo_path: &Utf8Path) -> Utf8PathBuf {
    let base = root_servo_path.parent().unwrap_or(Utf8Path::new(""));
    let tail = root_servo_path.file_name().unwrap_or("");
    let mut segments: Vec<&str> = tail.split('.').collect();
    segments.pop();
    base.join(segments.join("."))
}

/// Enumerate every servo device under the root servo's hub. Every device
/// has to carry a `serial` file.
pub async fn list_of_devices(
    runner: &dyn Runner,
    cancel: &CancellationToken,
    serial: &str,
    log: &Logger,
) -> Result<Vec<ServoTopologyItem>, TopologyError> {
    let root_path = root_servo_path(runner, cancel, serial).await?;
    let hub = servo_hub_path(&root_path);
    debug!(log, "list of devices"; "hub" => %hub);
    let found = runner
        .run(cancel, COMMAND_TIMEOUT, &format!("find {hub}/* -name {SERIAL_FILE}"))
        .await?;
    let mut devices = Vec::new();
    for serial_file in found.lines().map(str::trim).filter(|l| !l.is_empty()) {
        let device_path = Utf8Path::new(serial_file)
            .parent()
            .unwrap_or(Utf8Path::new(""))
            .to_owned();
        devices.push(read_device_info(runner, cancel, &device_path, log).await);
    }
    Ok(devices)
}

/// Retrieve the whole topology for the servo with the given serial: the
/// device whose serial matches becomes the root, everything else under the
/// hub becomes a child. Items missing data are logged and surfaced as-is.
pub async fn retrieve_servo_topology(
    runner: &dyn Runner,
    cancel: &CancellationToken,
    serial: &str,
    log: &Logger,
) -> Result<ServoTopology, TopologyError> {
    let mut topology = ServoTopology::default();
    for item in list_of_devices(runner, cancel, serial, log).await? {
        if !item.is_good() {
            info!(log, "topology item is missing some data"; "item" => %item);
        }
        if item.serial == serial {
            topology.root = Some(item);
        } else {
            topology.children.push(item);
        }
    }
    Ok(topology)
}
