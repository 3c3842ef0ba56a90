//! nusb-based USB transport implementation.

use std::io::{Read, Write};
use std::thread;
use std::time::Duration;

use nusb::descriptors::TransferType;
use nusb::transfer::{
    Bulk, ControlIn, ControlOut, ControlType, In, Out, Recipient, TransferError as UsbError,
};
use nusb::{Device, Interface, MaybeFuture, list_devices};
use tracing::{debug, info, instrument, warn};

use super::traits::{ProbeTransport, TransportError};
use crate::protocol::constants::SENSOR_CONFIGURATION;

/// Endpoint descriptor summary, as reported by [`NusbTransport::endpoints`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EndpointInfo {
    pub interface: u8,
    pub alt_setting: u8,
    pub address: u8,
    pub transfer_type: String,
    pub max_packet_size: usize,
}

/// nusb-based USB transport.
///
/// The interface is claimed with kernel-driver detachment on open and
/// released (re-attaching the kernel driver) when the transport is dropped.
pub struct NusbTransport {
    device: Device,
    interface: Option<Interface>,
    interface_number: u8,
    vid: u16,
    pid: u16,
}

impl NusbTransport {
    /// Open the device with a specific VID/PID and claim `interface_number`.
    #[instrument(level = "info", fields(vid = format!("{:04X}", vid), pid = format!("{:04X}", pid)))]
    pub fn open(vid: u16, pid: u16, interface_number: u8) -> Result<Self, TransportError> {
        let device = find_and_open(vid, pid)?;
        let interface = claim(&device, interface_number)?;

        info!(interface = interface_number, "Device opened successfully");

        Ok(Self {
            device,
            interface: Some(interface),
            interface_number,
            vid,
            pid,
        })
    }

    /// List the endpoints of every interface in every configuration.
    pub fn endpoints(&self) -> Vec<EndpointInfo> {
        let mut found = Vec::new();
        for config in self.device.configurations() {
            for iface in config.interfaces() {
                for alt in iface.alt_settings() {
                    for ep in alt.endpoints() {
                        let transfer_type = match ep.transfer_type() {
                            TransferType::Control => "Control",
                            TransferType::Isochronous => "Isochronous",
                            TransferType::Bulk => "Bulk",
                            TransferType::Interrupt => "Interrupt",
                        };
                        found.push(EndpointInfo {
                            interface: alt.interface_number(),
                            alt_setting: alt.alternate_setting(),
                            address: ep.address(),
                            transfer_type: transfer_type.to_string(),
                            max_packet_size: ep.max_packet_size(),
                        });
                    }
                }
            }
        }
        found
    }

    fn interface(&self) -> Result<&Interface, TransportError> {
        self.interface.as_ref().ok_or(TransportError::Disconnected)
    }
}

fn find_and_open(vid: u16, pid: u16) -> Result<Device, TransportError> {
    let device_info = list_devices()
        .wait()
        .map_err(|e| TransportError::OpenFailed(e.to_string()))?
        .find(|d| d.vendor_id() == vid && d.product_id() == pid)
        .ok_or(TransportError::DeviceNotFound { vid, pid })?;

    info!(
        vendor_id = %format!("{:04X}", vid),
        product_id = %format!("{:04X}", pid),
        "Found device"
    );

    device_info
        .open()
        .wait()
        .map_err(|e| TransportError::OpenFailed(e.to_string()))
}

fn claim(device: &Device, interface_number: u8) -> Result<Interface, TransportError> {
    device
        .detach_and_claim_interface(interface_number)
        .wait()
        .map_err(|e| TransportError::ClaimInterfaceFailed {
            interface: interface_number,
            message: e.to_string(),
        })
}

fn map_usb_error(err: UsbError, timeout: Duration) -> TransportError {
    match err {
        UsbError::Stall => TransportError::Stall,
        // nusb cancels transfers whose timeout expired.
        UsbError::Cancelled => TransportError::timeout(timeout),
        UsbError::Disconnected => TransportError::Disconnected,
        other => TransportError::TransferFailed(other.to_string()),
    }
}

fn map_io_error(err: std::io::Error, timeout: Duration) -> TransportError {
    if err.kind() == std::io::ErrorKind::TimedOut {
        return TransportError::timeout(timeout);
    }
    match err.get_ref().and_then(|inner| inner.downcast_ref::<UsbError>()) {
        Some(usb) => map_usb_error(usb.clone(), timeout),
        None => TransportError::Io(err),
    }
}

impl ProbeTransport for NusbTransport {
    #[instrument(skip(self))]
    fn reset(&mut self, settle: Duration) -> Result<(), TransportError> {
        // Configuration selection is refused while an interface is claimed.
        self.interface = None;

        self.device.reset().wait().map_err(|e| match e.kind() {
            nusb::ErrorKind::Disconnected => TransportError::Disconnected,
            _ => TransportError::ResetFailed(e.to_string()),
        })?;

        thread::sleep(settle);

        // The bus reset re-enumerates the device, so the old handle is stale.
        self.device = find_and_open(self.vid, self.pid).map_err(|e| match e {
            TransportError::DeviceNotFound { .. } => TransportError::Disconnected,
            other => other,
        })?;

        if let Err(e) = self.device.set_configuration(SENSOR_CONFIGURATION).wait() {
            warn!(error = %e, "Set configuration failed, keeping current configuration");
        }

        self.interface = Some(claim(&self.device, self.interface_number)?);
        debug!("Reset complete");
        Ok(())
    }

    fn control_write(
        &self,
        request: u8,
        value: u16,
        index: u16,
        timeout: Duration,
    ) -> Result<(), TransportError> {
        self.interface()?
            .control_out(
                ControlOut {
                    control_type: ControlType::Vendor,
                    recipient: Recipient::Device,
                    request,
                    value,
                    index,
                    data: &[],
                },
                timeout,
            )
            .wait()
            .map_err(|e| map_usb_error(e, timeout))
    }

    fn control_read(
        &self,
        request: u8,
        value: u16,
        index: u16,
        length: usize,
        timeout: Duration,
    ) -> Result<Vec<u8>, TransportError> {
        let length = u16::try_from(length)
            .map_err(|_| TransportError::TransferFailed(format!("read length {length} too large")))?;
        self.interface()?
            .control_in(
                ControlIn {
                    control_type: ControlType::Vendor,
                    recipient: Recipient::Device,
                    request,
                    value,
                    index,
                    length,
                },
                timeout,
            )
            .wait()
            .map_err(|e| map_usb_error(e, timeout))
    }

    #[instrument(skip(self, data), fields(ep = %format!("0x{:02X}", endpoint), len = data.len()))]
    fn bulk_write(
        &self,
        endpoint: u8,
        data: &[u8],
        timeout: Duration,
    ) -> Result<usize, TransportError> {
        let ep = self
            .interface()?
            .endpoint::<Bulk, Out>(endpoint)
            .map_err(|e| TransportError::TransferFailed(e.to_string()))?;

        let mut writer = ep.writer(4096).with_write_timeout(timeout);
        writer
            .write_all(data)
            .map_err(|e| map_io_error(e, timeout))?;
        writer.flush().map_err(|e| map_io_error(e, timeout))?;

        debug!(bytes_written = data.len(), "Write complete");
        Ok(data.len())
    }

    #[instrument(skip(self), fields(ep = %format!("0x{:02X}", endpoint)))]
    fn bulk_read(
        &self,
        endpoint: u8,
        max_len: usize,
        timeout: Duration,
    ) -> Result<Vec<u8>, TransportError> {
        let ep = self
            .interface()?
            .endpoint::<Bulk, In>(endpoint)
            .map_err(|e| TransportError::TransferFailed(e.to_string()))?;

        // Reader transfers must be a whole number of packets.
        let packet = ep.max_packet_size().max(1);
        let transfer_size = max_len.div_ceil(packet).max(1) * packet;

        let mut reader = ep.reader(transfer_size).with_read_timeout(timeout);
        let mut buf = vec![0u8; max_len];

        let n = reader
            .read(&mut buf)
            .map_err(|e| map_io_error(e, timeout))?;

        buf.truncate(n);
        debug!(bytes_read = n, "Read complete");
        Ok(buf)
    }

    fn vendor_id(&self) -> u16 {
        self.vid
    }

    fn product_id(&self) -> u16 {
        self.pid
    }
}

impl Drop for NusbTransport {
    fn drop(&mut self) {
        if self.interface.take().is_some() {
            debug!(interface = self.interface_number, "Interface released");
        }
    }
}
