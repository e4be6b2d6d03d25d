//! 帧编解码
//!
//! 线上格式：4 字节大端长度 + 负载。`Framer` 不假设一次 socket 读取恰好是
//! 一条消息，任意切分的字节流都能还原出完整的帧。

use crate::constants::{LENGTH_PREFIX_SIZE, MAX_FRAME_SIZE};
use crate::error::{ProtocolError, Result};

/// 一条完整消息的负载
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    payload: Vec<u8>,
}

impl Frame {
    /// 由负载创建帧
    pub fn new(payload: Vec<u8>) -> Self {
        Self { payload }
    }

    /// 负载字节
    pub fn payload(&self) -> &[u8] {
        &self.payload
    }

    /// 负载长度
    pub fn len(&self) -> usize {
        self.payload.len()
    }

    pub fn is_empty(&self) -> bool {
        self.payload.is_empty()
    }

    /// 取出负载
    pub fn into_payload(self) -> Vec<u8> {
        self.payload
    }
}

/// 编码一帧：长度前缀 + 负载
pub fn encode_frame(payload: &[u8], max_frame_size: usize) -> Result<Vec<u8>> {
    if payload.len() > max_frame_size {
        return Err(ProtocolError::FrameTooLarge {
            size: payload.len(),
            max: max_frame_size,
        });
    }

    let mut bytes = Vec::with_capacity(LENGTH_PREFIX_SIZE + payload.len());
    bytes.extend_from_slice(&(payload.len() as u32).to_be_bytes());
    bytes.extend_from_slice(payload);
    Ok(bytes)
}

/// 增量帧解析器
pub struct Framer {
    buffer: Vec<u8>,
    /// 已消费但尚未压缩的前缀长度
    consumed: usize,
    /// 超长帧剩余待丢弃的字节数
    discarding: usize,
    max_frame_size: usize,
}

impl Framer {
    /// 创建新的帧解析器
    pub fn new(max_frame_size: usize) -> Self {
        Self {
            buffer: Vec::new(),
            consumed: 0,
            discarding: 0,
            max_frame_size,
        }
    }

    /// 追加收到的字节
    pub fn feed(&mut self, bytes: &[u8]) {
        let mut bytes = bytes;
        if self.discarding > 0 {
            let skip = self.discarding.min(bytes.len());
            self.discarding -= skip;
            bytes = &bytes[skip..];
        }
        self.buffer.extend_from_slice(bytes);
    }

    /// 取出下一帧；数据不足时返回 `Ok(None)`
    ///
    /// 声明长度超过上限时返回 `FrameTooLarge`，并丢弃该帧的负载，
    /// 后续帧仍可正常解析。
    pub fn next_frame(&mut self) -> Result<Option<Frame>> {
        let available = &self.buffer[self.consumed..];
        if available.len() < LENGTH_PREFIX_SIZE {
            self.compact();
            return Ok(None);
        }

        let length =
            u32::from_be_bytes([available[0], available[1], available[2], available[3]]) as usize;

        if length > self.max_frame_size {
            let buffered = available.len() - LENGTH_PREFIX_SIZE;
            let skip = length.min(buffered);
            self.consumed += LENGTH_PREFIX_SIZE + skip;
            self.discarding = length - skip;
            self.compact();
            return Err(ProtocolError::FrameTooLarge {
                size: length,
                max: self.max_frame_size,
            });
        }

        if available.len() < LENGTH_PREFIX_SIZE + length {
            self.compact();
            return Ok(None);
        }

        let start = self.consumed + LENGTH_PREFIX_SIZE;
        let payload = self.buffer[start..start + length].to_vec();
        self.consumed = start + length;
        self.compact();
        Ok(Some(Frame::new(payload)))
    }

    /// 惰性迭代当前缓冲中的所有完整帧
    pub fn frames(&mut self) -> Frames<'_> {
        Frames { framer: self }
    }

    /// 已缓冲但尚未组成完整帧的字节数
    pub fn buffered(&self) -> usize {
        self.buffer.len() - self.consumed
    }

    /// 清空缓冲（切换到新连接时调用）
    pub fn reset(&mut self) {
        self.buffer.clear();
        self.consumed = 0;
        self.discarding = 0;
    }

    fn compact(&mut self) {
        if self.consumed == self.buffer.len() {
            self.buffer.clear();
            self.consumed = 0;
        } else if self.consumed > self.buffer.len() / 2 {
            self.buffer.drain(..self.consumed);
            self.consumed = 0;
        }
    }
}

impl Default for Framer {
    fn default() -> Self {
        Self::new(MAX_FRAME_SIZE)
    }
}

/// `Framer::frames` 返回的迭代器，数据不足时结束，再次 feed 后可重新迭代
pub struct Frames<'a> {
    framer: &'a mut Framer,
}

impl Iterator for Frames<'_> {
    type Item = Result<Frame>;

    fn next(&mut self) -> Option<Self::Item> {
        self.framer.next_frame().transpose()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const PAYLOAD: &[u8] = br#"{"type":"move","seq":2,"from":"e2","to":"e4","side":"white"}"#;

    #[test]
    fn test_single_frame() {
        let mut framer = Framer::default();
        framer.feed(&encode_frame(PAYLOAD, MAX_FRAME_SIZE).unwrap());

        let frame = framer.next_frame().unwrap().unwrap();
        assert_eq!(frame.payload(), PAYLOAD);
        assert_eq!(frame.len(), PAYLOAD.len());
        assert!(framer.next_frame().unwrap().is_none());
        assert_eq!(framer.buffered(), 0);
    }

    #[test]
    fn test_every_split_point() {
        let bytes = encode_frame(PAYLOAD, MAX_FRAME_SIZE).unwrap();

        for split in 0..=bytes.len() {
            let mut framer = Framer::default();
            framer.feed(&bytes[..split]);
            let first = framer.next_frame().unwrap();
            framer.feed(&bytes[split..]);

            let frames: Vec<Frame> = first
                .into_iter()
                .chain(framer.frames().map(|f| f.unwrap()))
                .collect();
            assert_eq!(frames.len(), 1, "split at {split}");
            assert_eq!(frames[0].payload(), PAYLOAD, "split at {split}");
        }
    }

    #[test]
    fn test_byte_at_a_time() {
        let bytes = encode_frame(PAYLOAD, MAX_FRAME_SIZE).unwrap();
        let mut framer = Framer::default();
        let mut frames = Vec::new();

        for byte in &bytes {
            framer.feed(std::slice::from_ref(byte));
            frames.extend(framer.frames().map(|f| f.unwrap()));
        }

        assert_eq!(frames, vec![Frame::new(PAYLOAD.to_vec())]);
    }

    #[test]
    fn test_multiple_frames_in_one_chunk() {
        let mut bytes = Vec::new();
        for payload in [&b"first"[..], b"second", b"", b"third"] {
            bytes.extend(encode_frame(payload, MAX_FRAME_SIZE).unwrap());
        }

        let mut framer = Framer::default();
        framer.feed(&bytes);
        let payloads: Vec<Vec<u8>> = framer
            .frames()
            .map(|f| f.unwrap().into_payload())
            .collect();
        assert_eq!(
            payloads,
            vec![b"first".to_vec(), b"second".to_vec(), Vec::new(), b"third".to_vec()]
        );
    }

    #[test]
    fn test_frame_too_large_skips_payload() {
        let mut framer = Framer::new(8);
        let oversized = vec![b'x'; 20];
        let mut bytes = (oversized.len() as u32).to_be_bytes().to_vec();
        bytes.extend(&oversized);
        bytes.extend(encode_frame(b"ok", 8).unwrap());

        // 分两次到达：超长帧的负载跨越了 feed 边界
        framer.feed(&bytes[..10]);
        match framer.next_frame() {
            Err(ProtocolError::FrameTooLarge { size, max }) => {
                assert_eq!(size, 20);
                assert_eq!(max, 8);
            }
            other => panic!("expected FrameTooLarge, got {:?}", other),
        }
        assert!(framer.next_frame().unwrap().is_none());

        framer.feed(&bytes[10..]);
        let frame = framer.next_frame().unwrap().unwrap();
        assert_eq!(frame.payload(), b"ok");
    }

    #[test]
    fn test_encode_rejects_oversized() {
        let err = encode_frame(&[0u8; 9], 8).unwrap_err();
        assert!(matches!(err, ProtocolError::FrameTooLarge { size: 9, max: 8 }));
    }

    #[test]
    fn test_reset_drops_partial_frame() {
        let bytes = encode_frame(PAYLOAD, MAX_FRAME_SIZE).unwrap();
        let mut framer = Framer::default();
        framer.feed(&bytes[..7]);
        framer.reset();
        assert_eq!(framer.buffered(), 0);

        framer.feed(&bytes);
        assert_eq!(framer.next_frame().unwrap().unwrap().payload(), PAYLOAD);
    }
}
