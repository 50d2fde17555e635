use audiod_core::{DeviceDescriptor, DeviceRole, DeviceType, IpcError, PrivacyClass};
use bytes::{Buf, BufMut, Bytes, BytesMut};

/// Strings longer than this are rejected on read.
const MAX_STRING_BYTES: usize = 64 * 1024;

// ── Writer ────────────────────────────────────────────────────

/// Little-endian encoder for one message body.
#[derive(Default)]
pub struct ParcelWriter {
    buf: BytesMut,
}

impl ParcelWriter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn write_u32(&mut self, v: u32) -> &mut Self {
        self.buf.put_u32_le(v);
        self
    }

    pub fn write_i32(&mut self, v: i32) -> &mut Self {
        self.buf.put_i32_le(v);
        self
    }

    pub fn write_u64(&mut self, v: u64) -> &mut Self {
        self.buf.put_u64_le(v);
        self
    }

    pub fn write_f32(&mut self, v: f32) -> &mut Self {
        self.buf.put_f32_le(v);
        self
    }

    pub fn write_bool(&mut self, v: bool) -> &mut Self {
        self.buf.put_u8(v as u8);
        self
    }

    /// `u32` byte length followed by UTF-8 bytes.
    pub fn write_string(&mut self, s: &str) -> &mut Self {
        self.buf.put_u32_le(s.len() as u32);
        self.buf.put_slice(s.as_bytes());
        self
    }

    /// Type and role first, so a reader that only knows the short form can
    /// stop after two i32s.
    pub fn write_device(&mut self, d: &DeviceDescriptor) -> &mut Self {
        self.write_i32(d.device_type.code())
            .write_i32(d.device_role.code())
            .write_u64(d.connect_timestamp_ms)
            .write_i32(d.privacy.code())
            .write_string(&d.network_id)
            .write_string(&d.mac_address)
            .write_string(&d.name)
    }

    pub fn len(&self) -> usize {
        self.buf.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    pub fn finish(self) -> Bytes {
        self.buf.freeze()
    }
}

// ── Reader ────────────────────────────────────────────────────

/// Bounds-checked decoder; every short read is `Malformed`.
pub struct ParcelReader {
    buf: Bytes,
}

impl ParcelReader {
    pub fn new(buf: Bytes) -> Self {
        Self { buf }
    }

    fn need(&self, n: usize, what: &str) -> Result<(), IpcError> {
        if self.buf.remaining() < n {
            return Err(IpcError::Malformed(format!(
                "truncated {what}: need {n} bytes, have {}",
                self.buf.remaining()
            )));
        }
        Ok(())
    }

    pub fn read_u32(&mut self) -> Result<u32, IpcError> {
        self.need(4, "u32")?;
        Ok(self.buf.get_u32_le())
    }

    pub fn read_i32(&mut self) -> Result<i32, IpcError> {
        self.need(4, "i32")?;
        Ok(self.buf.get_i32_le())
    }

    pub fn read_u64(&mut self) -> Result<u64, IpcError> {
        self.need(8, "u64")?;
        Ok(self.buf.get_u64_le())
    }

    pub fn read_f32(&mut self) -> Result<f32, IpcError> {
        self.need(4, "f32")?;
        Ok(self.buf.get_f32_le())
    }

    pub fn read_bool(&mut self) -> Result<bool, IpcError> {
        self.need(1, "bool")?;
        Ok(self.buf.get_u8() != 0)
    }

    pub fn read_string(&mut self) -> Result<String, IpcError> {
        let len = self.read_u32()? as usize;
        if len > MAX_STRING_BYTES {
            return Err(IpcError::Malformed(format!("string of {len} bytes")));
        }
        self.need(len, "string")?;
        let bytes = self.buf.split_to(len);
        String::from_utf8(bytes.to_vec())
            .map_err(|e| IpcError::Malformed(format!("invalid utf-8: {e}")))
    }

    pub fn read_device(&mut self) -> Result<DeviceDescriptor, IpcError> {
        let ty = self.read_i32()?;
        let device_type = DeviceType::from_code(ty)
            .ok_or_else(|| IpcError::Malformed(format!("device type {ty}")))?;
        let role = self.read_i32()?;
        let device_role = DeviceRole::from_code(role)
            .ok_or_else(|| IpcError::Malformed(format!("device role {role}")))?;
        let connect_timestamp_ms = self.read_u64()?;
        let privacy = self.read_i32()?;
        let privacy = PrivacyClass::from_code(privacy)
            .ok_or_else(|| IpcError::Malformed(format!("privacy class {privacy}")))?;
        Ok(DeviceDescriptor {
            device_type,
            device_role,
            connect_timestamp_ms,
            privacy,
            network_id: self.read_string()?,
            mac_address: self.read_string()?,
            name: self.read_string()?,
        })
    }

    pub fn remaining(&self) -> usize {
        self.buf.remaining()
    }

    /// Trailing bytes after a full decode mean the peer and we disagree on
    /// the layout.
    pub fn finish(self) -> Result<(), IpcError> {
        if self.buf.has_remaining() {
            return Err(IpcError::Malformed(format!(
                "{} trailing bytes",
                self.buf.remaining()
            )));
        }
        Ok(())
    }
}
