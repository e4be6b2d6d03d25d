//! 协议编解码：帧负载 <-> `ProtocolMessage`
//!
//! 只校验结构（格子在棋盘内、阵营取值、升变棋子），不判断走法是否合法。

use serde_json::Value;

use crate::error::{ProtocolError, Result};
use crate::framing::{encode_frame, Frame};
use crate::message::{MessageKind, ProtocolMessage};

/// JSON 编解码器
pub struct Codec;

impl Codec {
    /// 解码一帧
    pub fn decode(frame: &Frame) -> Result<ProtocolMessage> {
        Self::decode_bytes(frame.payload())
    }

    /// 解码原始 JSON 负载
    pub fn decode_bytes(payload: &[u8]) -> Result<ProtocolMessage> {
        let value: Value = serde_json::from_slice(payload)
            .map_err(|e| ProtocolError::MalformedMessage(format!("invalid JSON: {e}")))?;

        let tag = value
            .get("type")
            .and_then(Value::as_str)
            .ok_or_else(|| ProtocolError::MalformedMessage("missing \"type\" tag".to_string()))?;

        let kind = MessageKind::from_tag(tag)
            .ok_or_else(|| ProtocolError::UnknownMessageType(tag.to_string()))?;

        let msg: ProtocolMessage = serde_json::from_value(value)
            .map_err(|e| ProtocolError::MalformedMessage(format!("{kind}: {e}")))?;

        Self::validate(&msg)?;
        Ok(msg)
    }

    /// 编码为 JSON 负载
    pub fn encode(msg: &ProtocolMessage) -> Vec<u8> {
        // Board、Square、CastlingRights 经 `into = "String"` 走不会失败的 From 转换，
        // 其余字段都是字符串键和基础类型，序列化不会失败
        serde_json::to_vec(msg).expect("protocol messages always serialize")
    }

    /// 编码为带长度前缀的完整帧
    pub fn encode_framed(msg: &ProtocolMessage, max_frame_size: usize) -> Result<Vec<u8>> {
        encode_frame(&Self::encode(msg), max_frame_size)
    }

    /// serde 之外的结构校验
    fn validate(msg: &ProtocolMessage) -> Result<()> {
        if let ProtocolMessage::Move {
            promotion: Some(piece),
            ..
        } = msg
        {
            if !piece.is_promotion_target() {
                return Err(ProtocolError::MalformedMessage(format!(
                    "move: cannot promote to {:?}",
                    piece
                )));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::board::{Board, BoardState, CastlingRights};
    use crate::message::ErrorCode;
    use crate::piece::{PieceType, Side, Square};

    fn sq(s: &str) -> Square {
        s.parse().unwrap()
    }

    fn all_variants() -> Vec<ProtocolMessage> {
        vec![
            ProtocolMessage::Join { seq: 1, side: None },
            ProtocolMessage::Join {
                seq: 1,
                side: Some(Side::Black),
            },
            ProtocolMessage::Leave { seq: 9 },
            ProtocolMessage::Move {
                seq: 2,
                from: sq("e2"),
                to: sq("e4"),
                promotion: None,
                side: Side::White,
            },
            ProtocolMessage::Move {
                seq: 40,
                from: sq("b7"),
                to: sq("a8"),
                promotion: Some(PieceType::Knight),
                side: Side::White,
            },
            ProtocolMessage::SyncRequest { seq: 3 },
            ProtocolMessage::snapshot(4, 2, &BoardState::initial()),
            ProtocolMessage::SyncState {
                seq: u64::MAX,
                board: Board::empty(),
                side_to_move: Side::Black,
                ack: 0,
                castling: Some(CastlingRights::NONE),
                en_passant: Some(sq("e3")),
            },
            ProtocolMessage::Error {
                seq: 5,
                message: "illegal move".to_string(),
                code: Some(ErrorCode::IllegalMove),
            },
            ProtocolMessage::Error {
                seq: 6,
                message: "ünïcode ✓".to_string(),
                code: None,
            },
            ProtocolMessage::Heartbeat { seq: 7 },
        ]
    }

    #[test]
    fn test_roundtrip_all_variants() {
        for msg in all_variants() {
            let bytes = Codec::encode(&msg);
            let decoded = Codec::decode(&Frame::new(bytes.clone())).unwrap();
            assert_eq!(decoded, msg);
            assert_eq!(Codec::encode(&decoded), bytes);
        }
    }

    #[test]
    fn test_decode_scenario_json() {
        let msg = Codec::decode_bytes(
            br#"{"type":"move","seq":2,"from":"e2","to":"e4","side":"white"}"#,
        )
        .unwrap();
        assert_eq!(
            msg,
            ProtocolMessage::Move {
                seq: 2,
                from: sq("e2"),
                to: sq("e4"),
                promotion: None,
                side: Side::White,
            }
        );
    }

    #[test]
    fn test_out_of_bounds_square() {
        let err = Codec::decode_bytes(
            br#"{"type":"move","seq":2,"from":"e2","to":"i9","side":"white"}"#,
        )
        .unwrap_err();
        assert!(matches!(err, ProtocolError::MalformedMessage(_)), "{err:?}");
    }

    #[test]
    fn test_invalid_side() {
        let err = Codec::decode_bytes(
            br#"{"type":"move","seq":2,"from":"e2","to":"e4","side":"red"}"#,
        )
        .unwrap_err();
        assert!(matches!(err, ProtocolError::MalformedMessage(_)));
    }

    #[test]
    fn test_invalid_promotion() {
        let err = Codec::decode_bytes(
            br#"{"type":"move","seq":2,"from":"e7","to":"e8","promotion":"king","side":"white"}"#,
        )
        .unwrap_err();
        assert!(matches!(err, ProtocolError::MalformedMessage(_)));
    }

    #[test]
    fn test_unknown_type_is_distinct() {
        let err = Codec::decode_bytes(br#"{"type":"resign","seq":3}"#).unwrap_err();
        match err {
            ProtocolError::UnknownMessageType(tag) => assert_eq!(tag, "resign"),
            other => panic!("unexpected error: {:?}", other),
        }
    }

    #[test]
    fn test_structural_failures() {
        let cases: [&[u8]; 7] = [
            b"not json",
            b"\xff\xfe",
            br#"{"seq":1}"#,
            br#"{"type":7,"seq":1}"#,
            br#"{"type":"heartbeat"}"#,
            br#"{"type":"heartbeat","seq":-1}"#,
            br#"{"type":"sync_state","seq":1,"board":"8/8","side_to_move":"white"}"#,
        ];
        for payload in cases {
            let err = Codec::decode_bytes(payload).unwrap_err();
            assert!(
                matches!(err, ProtocolError::MalformedMessage(_)),
                "{:?} -> {err:?}",
                String::from_utf8_lossy(payload)
            );
        }
    }

    #[test]
    fn test_fractional_seq_rejected() {
        let err = Codec::decode_bytes(br#"{"type":"heartbeat","seq":1.5}"#).unwrap_err();
        assert!(matches!(err, ProtocolError::MalformedMessage(_)));
    }

    #[test]
    fn test_encode_framed_prefix() {
        let msg = ProtocolMessage::Heartbeat { seq: 1 };
        let bytes = Codec::encode_framed(&msg, 1024).unwrap();
        let payload = Codec::encode(&msg);
        assert_eq!(&bytes[..4], &(payload.len() as u32).to_be_bytes());
        assert_eq!(&bytes[4..], payload.as_slice());
    }
}
