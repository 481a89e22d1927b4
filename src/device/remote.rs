//! A destination device reachable over TCP. treats the actual
//! network transport as external to the core — the synchronizer only ever
//! sees the [`BlockDevice`] trait — so this is a minimal reference
//! implementation sufficient to exercise the synchronizer end to end, not a
//! production wire protocol.

use std::io::{Read, Write};
use std::net::TcpStream;

use parking_lot::Mutex;

use super::{BlockDevice, DeviceError, DeviceId};

const OP_READ: u8 = 1;
const OP_WRITE: u8 = 2;
const OP_SIZE: u8 = 3;

/// A block device proxied over a plain TCP connection to a remote agent.
/// The remote agent's own protocol handling is outside this core's scope;
/// this type only needs to satisfy [`BlockDevice`] so the synchronizer can
/// treat local and remote destinations identically.
pub struct RemoteBlockDevice {
    id: DeviceId,
    label: String,
    stream: Mutex<TcpStream>,
    size_bytes: u64,
    block_size_bytes: u64,
}

impl RemoteBlockDevice {
    pub fn connect(
        id: DeviceId,
        host: &str,
        port: u16,
        remote_device_id: DeviceId,
    ) -> Result<Self, DeviceError> {
        let label = format!("{host}:{port}/{remote_device_id}");
        let mut stream = TcpStream::connect((host, port)).map_err(|source| DeviceError::Open {
            device: label.clone(),
            source,
        })?;

        send_header(&mut stream, OP_SIZE, 0, 0).map_err(|source| DeviceError::SizeQuery {
            device: label.clone(),
            source,
        })?;
        let mut size_buf = [0u8; 16];
        stream
            .read_exact(&mut size_buf)
            .map_err(|source| DeviceError::SizeQuery {
                device: label.clone(),
                source,
            })?;
        let size_bytes = u64::from_be_bytes(size_buf[0..8].try_into().unwrap());
        let block_size_bytes = u64::from_be_bytes(size_buf[8..16].try_into().unwrap());

        Ok(Self {
            id,
            label,
            stream: Mutex::new(stream),
            size_bytes,
            block_size_bytes,
        })
    }
}

fn send_header(stream: &mut TcpStream, op: u8, offset: u64, len: u64) -> std::io::Result<()> {
    let mut header = [0u8; 17];
    header[0] = op;
    header[1..9].copy_from_slice(&offset.to_be_bytes());
    header[9..17].copy_from_slice(&len.to_be_bytes());
    stream.write_all(&header)
}

impl BlockDevice for RemoteBlockDevice {
    fn id(&self) -> DeviceId {
        self.id
    }

    fn path(&self) -> &str {
        &self.label
    }

    fn size_bytes(&self) -> u64 {
        self.size_bytes
    }

    fn block_size_bytes(&self) -> u64 {
        self.block_size_bytes
    }

    fn read_at(&self, offset: u64, buf: &mut [u8]) -> Result<usize, DeviceError> {
        let mut stream = self.stream.lock();
        send_header(&mut stream, OP_READ, offset, buf.len() as u64).map_err(|source| {
            DeviceError::Io {
                device: self.label.clone(),
                offset,
                source,
            }
        })?;
        stream.read_exact(buf).map_err(|source| DeviceError::Io {
            device: self.label.clone(),
            offset,
            source,
        })?;
        Ok(buf.len())
    }

    fn write_at(&self, offset: u64, buf: &[u8]) -> Result<(), DeviceError> {
        let mut stream = self.stream.lock();
        send_header(&mut stream, OP_WRITE, offset, buf.len() as u64).map_err(|source| {
            DeviceError::Io {
                device: self.label.clone(),
                offset,
                source,
            }
        })?;
        stream.write_all(buf).map_err(|source| DeviceError::Io {
            device: self.label.clone(),
            offset,
            source,
        })
    }

    // freeze/thaw/in_use_sectors keep the trait's default no-op/unsupported
    // behavior: a remote destination has no local filesystem to quiesce.
}
