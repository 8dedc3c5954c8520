//! USB bulk transport
//!
//! USB devices expose three bulk endpoints: host-out for commands,
//! host-in for responses and a second host-in endpoint for unsolicited
//! cyclic time messages. A command is a single byte, except for
//! large-structure transactions where a `READ_GPS_DATA` /
//! `WRITE_GPS_DATA` prefix is followed by the sub-type byte.

use crate::device::DeviceIo;
use crate::error::{DriverError, DriverResult};
use crate::hal::{EndpointDesc, UsbIo};
use crate::timeout::{USB_CYCLIC_TIMEOUT_MS, USB_TIMEOUT_MS};
use crate::types::{cmd, Time, Wire};

/// Minimum number of endpoints a usable device must advertise
pub const MIN_ENDPOINTS_REQUIRED: usize = 3;

/// Fixed endpoint order in the interface descriptor
pub const EP_IDX_HOST_IN: usize = 0;
pub const EP_IDX_HOST_OUT: usize = 1;
pub const EP_IDX_HOST_IN_CYCLIC: usize = 2;

/// Pick the engine's endpoints out of an interface descriptor
pub fn select_endpoints(
    eps: &[EndpointDesc],
) -> DriverResult<(EndpointDesc, EndpointDesc, EndpointDesc)> {
    if eps.len() < MIN_ENDPOINTS_REQUIRED {
        return Err(DriverError::ResourceItem);
    }
    let host_in = eps[EP_IDX_HOST_IN];
    let host_out = eps[EP_IDX_HOST_OUT];
    let cyclic_in = eps[EP_IDX_HOST_IN_CYCLIC];
    if !host_in.is_in() || host_out.is_in() || !cyclic_in.is_in() {
        return Err(DriverError::ResourceItem);
    }
    Ok((host_in, host_out, cyclic_in))
}

/// Generic read: send the command, then drain the response from the
/// host-in endpoint. `gps_sub_cmd` turns the command into the two-byte
/// large-structure form.
pub(crate) fn read_generic(
    io: &mut DeviceIo,
    cmd_byte: u8,
    gps_sub_cmd: Option<u8>,
    buf: &mut [u8],
) -> DriverResult<()> {
    // Marshal the command through the shared DMA-capable buffer.
    let out_len = match gps_sub_cmd {
        Some(sub) => {
            io.buffer[0] = cmd_byte;
            io.buffer[1] = sub;
            2
        }
        None => {
            io.buffer[0] = cmd_byte;
            1
        }
    };

    let usb = io.usb.as_ref().ok_or(DriverError::NoDevice)?;

    let sent = usb
        .io
        .bulk_out(usb.ep_host_out.addr, &io.buffer[..out_len], USB_TIMEOUT_MS)?;
    if sent != out_len {
        return Err(DriverError::ByteCount);
    }

    if buf.is_empty() {
        return Ok(());
    }

    let received = usb.io.bulk_in(usb.ep_host_in.addr, buf, USB_TIMEOUT_MS)?;
    if received != buf.len() {
        log::warn!(
            "usb: rcvd. {} != exp. {} for cmd 0x{:02X}",
            received,
            buf.len(),
            cmd_byte
        );
        return Err(DriverError::ByteCount);
    }

    Ok(())
}

/// Generic write: one OUT transfer with command byte(s) plus payload,
/// then read the 1-byte device completion code.
pub(crate) fn write_generic(
    io: &mut DeviceIo,
    cmd_byte: u8,
    gps_data: bool,
    data: &[u8],
) -> DriverResult<i8> {
    let header = if gps_data { 2 } else { 1 };
    let total = header + data.len();
    if total > io.buffer.len() {
        return Err(DriverError::NoMemory);
    }

    if gps_data {
        io.buffer[0] = cmd::WRITE_GPS_DATA;
        io.buffer[1] = cmd_byte;
    } else {
        io.buffer[0] = cmd_byte;
    }
    io.buffer[header..total].copy_from_slice(data);

    let usb = io.usb.as_ref().ok_or(DriverError::NoDevice)?;

    let sent = usb
        .io
        .bulk_out(usb.ep_host_out.addr, &io.buffer[..total], USB_TIMEOUT_MS)?;
    if sent != total {
        return Err(DriverError::ByteCount);
    }

    let mut code = [0u8; 1];
    let received = usb.io.bulk_in(usb.ep_host_in.addr, &mut code, USB_TIMEOUT_MS)?;
    if received != 1 {
        return Err(DriverError::ByteCount);
    }

    let code = code[0] as i8;
    if code > 0 {
        // The firmware answers a bare byte count when the payload size
        // didn't match what the command expects.
        log::warn!(
            "usb: cmd 0x{:02X} with {} payload bytes, device expects {}",
            cmd_byte,
            data.len(),
            code
        );
        return Err(DriverError::ByteCount);
    }

    Ok(code)
}

/// Blocking read of one cyclic time message; bounded by the cyclic
/// timeout, which is longer than the 1 s message interval.
///
/// Runs on the cyclic worker task and therefore takes the pipe handle
/// directly instead of the transaction-mutex-guarded state: a blocked
/// cyclic read must not stall foreground transactions.
pub(crate) fn read_cyclic(usb_io: &dyn UsbIo, ep: EndpointDesc) -> DriverResult<Time> {
    let mut buf = [0u8; Time::SIZE];
    let received = usb_io.bulk_in(ep.addr, &mut buf, USB_CYCLIC_TIMEOUT_MS)?;
    if received != Time::SIZE {
        return Err(DriverError::ByteCount);
    }
    Ok(Time::from_wire(&buf))
}
