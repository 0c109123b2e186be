/// 录制文件的容器格式（根据文件头识别）
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Container {
    WebM,
    Mp4,
    Unknown,
}

impl Container {
    /// 按文件头魔数识别
    ///
    /// - WebM/Matroska: EBML 头 `1A 45 DF A3`
    /// - MP4/MOV: 偏移 4 处的 `ftyp` box
    pub fn sniff(bytes: &[u8]) -> Self {
        if bytes.starts_with(&[0x1A, 0x45, 0xDF, 0xA3]) {
            Container::WebM
        } else if bytes.len() >= 8 && &bytes[4..8] == b"ftyp" {
            Container::Mp4
        } else {
            Container::Unknown
        }
    }

    pub fn extension(&self) -> &'static str {
        match self {
            Container::WebM => "webm",
            Container::Mp4 => "mp4",
            Container::Unknown => "bin",
        }
    }
}
