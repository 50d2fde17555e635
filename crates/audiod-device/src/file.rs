use crate::adapter::{AdapterAttr, SinkAdapter, SourceAdapter};
use audiod_core::DeviceError;
use std::fs::File;
use std::io::Write;
use std::path::PathBuf;

/// Appends every rendered frame as raw PCM to a file.
pub struct FileSink {
    output_path: Option<PathBuf>,
    file: Option<File>,
    started: bool,
    frame_count: usize,
}

impl FileSink {
    pub fn new() -> Self {
        Self {
            output_path: None,
            file: None,
            started: false,
            frame_count: 0,
        }
    }

    pub fn frame_count(&self) -> usize {
        self.frame_count
    }
}

impl Default for FileSink {
    fn default() -> Self {
        Self::new()
    }
}

impl SinkAdapter for FileSink {
    fn name(&self) -> &str {
        "file"
    }

    fn init(&mut self, attr: &AdapterAttr) -> Result<(), DeviceError> {
        let path = attr.option_str("path").ok_or_else(|| {
            DeviceError::InitializationFailed("missing 'path' in adapter options".to_string())
        })?;
        self.output_path = Some(PathBuf::from(path));
        Ok(())
    }

    fn start(&mut self) -> Result<(), DeviceError> {
        let path = self
            .output_path
            .as_ref()
            .ok_or_else(|| DeviceError::InitializationFailed("not initialized".to_string()))?;
        if self.file.is_none() {
            let file = std::fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .map_err(|e| DeviceError::Io(e.to_string()))?;
            self.file = Some(file);
        }
        self.started = true;
        Ok(())
    }

    fn stop(&mut self) -> Result<(), DeviceError> {
        self.started = false;
        if let Some(mut file) = self.file.take() {
            file.flush().map_err(|e| DeviceError::Io(e.to_string()))?;
        }
        Ok(())
    }

    fn pause(&mut self) -> Result<(), DeviceError> {
        self.started = false;
        Ok(())
    }

    fn resume(&mut self) -> Result<(), DeviceError> {
        self.start()
    }

    fn render_frame(&mut self, data: &[u8]) -> Result<usize, DeviceError> {
        if !self.started {
            return Err(DeviceError::NotStarted);
        }
        let file = self.file.as_mut().ok_or(DeviceError::NotStarted)?;
        file.write_all(data)
            .map_err(|e| DeviceError::Io(e.to_string()))?;
        self.frame_count += 1;
        Ok(data.len())
    }

    fn set_volume(&mut self, _volume: f32) {}

    fn latency_ms(&self) -> u32 {
        0
    }
}

/// Plays back raw PCM from a file, then silence.
pub struct FileSource {
    data: Vec<u8>,
    offset: usize,
    started: bool,
}

impl FileSource {
    pub fn new() -> Self {
        Self {
            data: Vec::new(),
            offset: 0,
            started: false,
        }
    }

    pub fn remaining(&self) -> usize {
        self.data.len() - self.offset
    }
}

impl Default for FileSource {
    fn default() -> Self {
        Self::new()
    }
}

impl SourceAdapter for FileSource {
    fn name(&self) -> &str {
        "file"
    }

    fn init(&mut self, attr: &AdapterAttr) -> Result<(), DeviceError> {
        let path = attr.option_str("path").ok_or_else(|| {
            DeviceError::InitializationFailed("missing 'path' in adapter options".to_string())
        })?;
        self.data = std::fs::read(path).map_err(|e| DeviceError::Io(e.to_string()))?;
        self.offset = 0;
        Ok(())
    }

    fn start(&mut self) -> Result<(), DeviceError> {
        self.started = true;
        Ok(())
    }

    fn stop(&mut self) -> Result<(), DeviceError> {
        self.started = false;
        self.offset = 0;
        Ok(())
    }

    fn pause(&mut self) -> Result<(), DeviceError> {
        self.started = false;
        Ok(())
    }

    fn resume(&mut self) -> Result<(), DeviceError> {
        self.started = true;
        Ok(())
    }

    fn capture_frame(&mut self, data: &mut [u8]) -> Result<usize, DeviceError> {
        if !self.started {
            return Err(DeviceError::NotStarted);
        }
        let n = data.len().min(self.remaining());
        data[..n].copy_from_slice(&self.data[self.offset..self.offset + n]);
        data[n..].fill(0);
        self.offset += n;
        Ok(data.len())
    }

    fn set_volume(&mut self, _volume: f32) {}

    fn latency_ms(&self) -> u32 {
        0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use audiod_core::{DeviceDescriptor, DeviceRole, DeviceType, StreamInfo};

    fn file_attr(path: &std::path::Path) -> AdapterAttr {
        AdapterAttr::new(
            DeviceDescriptor::new(DeviceType::FileSink, DeviceRole::Output),
            StreamInfo::default(),
        )
        .with_option(
            "path",
            toml::Value::String(path.to_string_lossy().to_string()),
        )
    }

    fn empty_attr() -> AdapterAttr {
        AdapterAttr::new(DeviceDescriptor::none(), StreamInfo::default())
    }

    #[test]
    fn test_file_sink_name() {
        assert_eq!(FileSink::new().name(), "file");
    }

    #[test]
    fn test_file_sink_initialize_missing_path_fails() {
        let mut sink = FileSink::new();
        match sink.init(&empty_attr()) {
            Err(DeviceError::InitializationFailed(msg)) => assert!(msg.contains("path")),
            _ => panic!("expected InitializationFailed"),
        }
    }

    #[test]
    fn test_file_sink_render_before_start_fails() {
        let mut sink = FileSink::new();
        match sink.render_frame(&[0; 4]) {
            Err(DeviceError::NotStarted) => {}
            _ => panic!("expected NotStarted"),
        }
    }

    #[test]
    fn test_file_sink_appends_frames() {
        let dir = std::env::temp_dir().join("audiod_file_sink_append");
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("out.pcm");
        let _ = std::fs::remove_file(&path);

        let mut sink = FileSink::new();
        sink.init(&file_attr(&path)).unwrap();
        sink.start().unwrap();
        sink.render_frame(&[1, 2]).unwrap();
        sink.render_frame(&[3, 4]).unwrap();
        sink.stop().unwrap();

        assert_eq!(std::fs::read(&path).unwrap(), vec![1, 2, 3, 4]);
        assert_eq!(sink.frame_count(), 2);

        std::fs::remove_dir_all(&dir).unwrap();
    }

    #[test]
    fn test_file_source_reads_then_silence() {
        let dir = std::env::temp_dir().join("audiod_file_source_read");
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("in.pcm");
        std::fs::write(&path, [5u8, 6, 7]).unwrap();

        let mut source = FileSource::new();
        source.init(&file_attr(&path)).unwrap();
        source.start().unwrap();

        let mut buf = [0xffu8; 2];
        source.capture_frame(&mut buf).unwrap();
        assert_eq!(buf, [5, 6]);
        source.capture_frame(&mut buf).unwrap();
        assert_eq!(buf, [7, 0]);
        assert_eq!(source.remaining(), 0);

        std::fs::remove_dir_all(&dir).unwrap();
    }

    #[test]
    fn test_file_source_missing_file_fails() {
        let path = std::env::temp_dir().join("audiod_file_source_missing.pcm");
        let _ = std::fs::remove_file(&path);
        let mut source = FileSource::new();
        match source.init(&file_attr(&path)) {
            Err(DeviceError::Io(_)) => {}
            _ => panic!("expected Io"),
        }
    }
}
