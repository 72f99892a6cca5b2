//! Binary wire protocol for the market-data and execution feed.
//!
//! Every frame is `[u32 length][payload]`, big-endian, and the first
//! payload byte is the message type tag. Doubles travel as their IEEE-754
//! bit pattern in the same byte order as u64. Frames above [`MAX_FRAME_LEN`]
//! are refused.

use thiserror::Error;

use crate::messages::{
    Ack, AckStatus, CancelRequest, ClientMessage, L2Update, MsgType, NewOrder, PnlUpdate,
    ServerMessage, Side, TopOfBook, Trade,
};

/// Upper bound on a frame's payload length.
pub const MAX_FRAME_LEN: u32 = 10 * 1024 * 1024;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum WireError {
    #[error("frame length {len} exceeds {MAX_FRAME_LEN} bytes")]
    FrameTooLarge { len: u32 },
    #[error("payload truncated")]
    Truncated,
    #[error("unknown message type {0}")]
    UnknownType(u8),
    #[error("invalid side byte {0}")]
    InvalidSide(u8),
    #[error("invalid ack status byte {0}")]
    InvalidAckStatus(u8),
}

// ============================================================================
// Primitive writers/readers
// ============================================================================

#[inline]
fn put_u8(buf: &mut Vec<u8>, v: u8) {
    buf.push(v);
}

#[inline]
fn put_u32(buf: &mut Vec<u8>, v: u32) {
    buf.extend_from_slice(&v.to_be_bytes());
}

#[inline]
fn put_u64(buf: &mut Vec<u8>, v: u64) {
    buf.extend_from_slice(&v.to_be_bytes());
}

#[inline]
fn put_f64(buf: &mut Vec<u8>, v: f64) {
    put_u64(buf, v.to_bits());
}

struct Reader<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    fn new(buf: &'a [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    fn take(&mut self, n: usize) -> Result<&'a [u8], WireError> {
        let end = self.pos.checked_add(n).ok_or(WireError::Truncated)?;
        if end > self.buf.len() {
            return Err(WireError::Truncated);
        }
        let slice = &self.buf[self.pos..end];
        self.pos = end;
        Ok(slice)
    }

    fn u8(&mut self) -> Result<u8, WireError> {
        Ok(self.take(1)?[0])
    }

    fn u32(&mut self) -> Result<u32, WireError> {
        let b = self.take(4)?;
        Ok(u32::from_be_bytes([b[0], b[1], b[2], b[3]]))
    }

    fn u64(&mut self) -> Result<u64, WireError> {
        let b = self.take(8)?;
        Ok(u64::from_be_bytes([b[0], b[1], b[2], b[3], b[4], b[5], b[6], b[7]]))
    }

    fn f64(&mut self) -> Result<f64, WireError> {
        Ok(f64::from_bits(self.u64()?))
    }

    fn side(&mut self) -> Result<Side, WireError> {
        let b = self.u8()?;
        Side::from_u8(b).ok_or(WireError::InvalidSide(b))
    }
}

#[inline]
fn frame(payload: Vec<u8>) -> Vec<u8> {
    let mut framed = Vec::with_capacity(4 + payload.len());
    put_u32(&mut framed, payload.len() as u32);
    framed.extend_from_slice(&payload);
    framed
}

// ============================================================================
// Engine -> world
// ============================================================================

/// Encode a server message as a complete length-prefixed frame.
pub fn encode_server_message(msg: &ServerMessage) -> Vec<u8> {
    let mut p = Vec::with_capacity(64);
    match *msg {
        ServerMessage::Trade(t) => {
            put_u8(&mut p, MsgType::Trade as u8);
            put_u64(&mut p, t.trade_id);
            put_u64(&mut p, t.buy_order_id);
            put_u64(&mut p, t.buy_user_id);
            put_u64(&mut p, t.sell_order_id);
            put_u64(&mut p, t.sell_user_id);
            put_f64(&mut p, t.price);
            put_u64(&mut p, t.quantity);
        }
        ServerMessage::Ack(a) => {
            put_u8(&mut p, MsgType::Ack as u8);
            put_u8(&mut p, a.status as u8);
            put_u8(&mut p, a.kind as u8);
            put_u64(&mut p, a.order_id);
        }
        ServerMessage::TopOfBook(t) => {
            put_u8(&mut p, MsgType::TopOfBook as u8);
            put_f64(&mut p, if t.has_bid { t.bid_price } else { 0.0 });
            put_u64(&mut p, if t.has_bid { t.bid_quantity } else { 0 });
            put_f64(&mut p, if t.has_ask { t.ask_price } else { 0.0 });
            put_u64(&mut p, if t.has_ask { t.ask_quantity } else { 0 });
        }
        ServerMessage::L2(l) => {
            put_u8(&mut p, MsgType::L2Update as u8);
            put_u8(&mut p, l.side.as_u8());
            put_f64(&mut p, l.price);
            put_u64(&mut p, l.quantity);
        }
        ServerMessage::Pnl(u) => {
            put_u8(&mut p, MsgType::PnlUpdate as u8);
            put_u32(&mut p, u.user_id);
            put_f64(&mut p, u.realized);
            put_f64(&mut p, u.unrealized);
            put_f64(&mut p, u.position);
            put_f64(&mut p, u.avg_price);
            put_f64(&mut p, u.equity);
        }
    }
    frame(p)
}

/// Decode one server-message payload (frame header already stripped).
///
/// The wire TOB carries no presence flags; absent sides are zeros and
/// prices are strictly positive, so presence is recovered from the price.
/// PNL position is an f64 like every other PnL field.
pub fn decode_server_payload(payload: &[u8]) -> Result<ServerMessage, WireError> {
    let mut r = Reader::new(payload);
    let tag = r.u8()?;
    match MsgType::from_u8(tag) {
        Some(MsgType::Trade) => {
            let trade_id = r.u64()?;
            let buy_order_id = r.u64()?;
            let buy_user_id = r.u64()?;
            let sell_order_id = r.u64()?;
            let sell_user_id = r.u64()?;
            let price = r.f64()?;
            let quantity = r.u64()?;
            Ok(ServerMessage::Trade(Trade {
                trade_id,
                buy_order_id,
                sell_order_id,
                buy_user_id,
                sell_user_id,
                price,
                quantity,
                instrument_id: 0,
            }))
        }
        Some(MsgType::Ack) => {
            let status = match r.u8()? {
                0 => AckStatus::Ok,
                1 => AckStatus::Error,
                b => return Err(WireError::InvalidAckStatus(b)),
            };
            let kind_byte = r.u8()?;
            let kind = match MsgType::from_u8(kind_byte) {
                Some(k @ (MsgType::NewOrder | MsgType::Cancel)) => k,
                _ => return Err(WireError::UnknownType(kind_byte)),
            };
            let order_id = r.u64()?;
            Ok(ServerMessage::Ack(Ack { status, kind, order_id }))
        }
        Some(MsgType::TopOfBook) => {
            let bid_price = r.f64()?;
            let bid_quantity = r.u64()?;
            let ask_price = r.f64()?;
            let ask_quantity = r.u64()?;
            Ok(ServerMessage::TopOfBook(TopOfBook {
                has_bid: bid_price > 0.0,
                bid_price,
                bid_quantity,
                has_ask: ask_price > 0.0,
                ask_price,
                ask_quantity,
            }))
        }
        Some(MsgType::L2Update) => {
            let side = r.side()?;
            let price = r.f64()?;
            let quantity = r.u64()?;
            Ok(ServerMessage::L2(L2Update { side, price, quantity }))
        }
        Some(MsgType::PnlUpdate) => {
            let user_id = r.u32()?;
            let realized = r.f64()?;
            let unrealized = r.f64()?;
            let position = r.f64()?;
            let avg_price = r.f64()?;
            let equity = r.f64()?;
            Ok(ServerMessage::Pnl(PnlUpdate {
                user_id,
                realized,
                unrealized,
                position,
                avg_price,
                equity,
            }))
        }
        _ => Err(WireError::UnknownType(tag)),
    }
}

// ============================================================================
// World -> engine
// ============================================================================

/// Encode a client message as a complete length-prefixed frame.
pub fn encode_client_message(msg: &ClientMessage) -> Vec<u8> {
    let mut p = Vec::with_capacity(32);
    match *msg {
        ClientMessage::NewOrder(o) => {
            put_u8(&mut p, MsgType::NewOrder as u8);
            put_u64(&mut p, o.user_id);
            put_u8(&mut p, o.side.as_u8());
            put_f64(&mut p, o.price);
            put_u64(&mut p, o.quantity);
        }
        ClientMessage::Cancel(c) => {
            put_u8(&mut p, MsgType::Cancel as u8);
            put_u64(&mut p, c.order_id);
        }
    }
    frame(p)
}

/// Decode one client-message payload (frame header already stripped).
pub fn decode_client_payload(payload: &[u8]) -> Result<ClientMessage, WireError> {
    let mut r = Reader::new(payload);
    let tag = r.u8()?;
    match MsgType::from_u8(tag) {
        Some(MsgType::NewOrder) => {
            let user_id = r.u64()?;
            let side = r.side()?;
            let price = r.f64()?;
            let quantity = r.u64()?;
            Ok(ClientMessage::NewOrder(NewOrder { user_id, side, price, quantity }))
        }
        Some(MsgType::Cancel) => {
            let order_id = r.u64()?;
            Ok(ClientMessage::Cancel(CancelRequest { order_id }))
        }
        _ => Err(WireError::UnknownType(tag)),
    }
}

// ============================================================================
// Stream reassembly
// ============================================================================

/// Accumulates stream bytes and yields complete frame payloads.
#[derive(Default)]
pub struct FrameAssembler {
    buf: Vec<u8>,
}

impl FrameAssembler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append raw bytes read from the transport.
    pub fn extend(&mut self, bytes: &[u8]) {
        self.buf.extend_from_slice(bytes);
    }

    /// Next complete payload, if one is buffered. An oversized length
    /// header poisons the stream; the caller should drop the connection.
    pub fn next_payload(&mut self) -> Result<Option<Vec<u8>>, WireError> {
        if self.buf.len() < 4 {
            return Ok(None);
        }
        let len = u32::from_be_bytes([self.buf[0], self.buf[1], self.buf[2], self.buf[3]]);
        if len > MAX_FRAME_LEN {
            return Err(WireError::FrameTooLarge { len });
        }
        let total = 4 + len as usize;
        if self.buf.len() < total {
            return Ok(None);
        }
        let payload = self.buf[4..total].to_vec();
        self.buf.drain(..total);
        Ok(Some(payload))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn trade_frame_layout_is_bit_exact() {
        let msg = ServerMessage::Trade(Trade {
            trade_id: 1,
            buy_order_id: 2,
            sell_order_id: 3,
            buy_user_id: 4,
            sell_user_id: 5,
            price: 101.0,
            quantity: 6,
            instrument_id: 1,
        });
        let framed = encode_server_message(&msg);

        let mut expected = Vec::new();
        expected.extend_from_slice(&57u32.to_be_bytes()); // 1 tag + 7 * 8
        expected.push(3); // TRADE
        expected.extend_from_slice(&1u64.to_be_bytes());
        expected.extend_from_slice(&2u64.to_be_bytes()); // buy order
        expected.extend_from_slice(&4u64.to_be_bytes()); // buy user
        expected.extend_from_slice(&3u64.to_be_bytes()); // sell order
        expected.extend_from_slice(&5u64.to_be_bytes()); // sell user
        expected.extend_from_slice(&101.0f64.to_bits().to_be_bytes());
        expected.extend_from_slice(&6u64.to_be_bytes());
        assert_eq!(framed, expected);
    }

    #[test]
    fn new_order_frame_layout_is_bit_exact() {
        let msg = ClientMessage::NewOrder(NewOrder {
            user_id: 9,
            side: Side::Sell,
            price: 100.5,
            quantity: 20,
        });
        let framed = encode_client_message(&msg);

        let mut expected = Vec::new();
        expected.extend_from_slice(&26u32.to_be_bytes()); // 1 + 8 + 1 + 8 + 8
        expected.push(1); // NEW_ORDER
        expected.extend_from_slice(&9u64.to_be_bytes());
        expected.push(1); // sell
        expected.extend_from_slice(&100.5f64.to_bits().to_be_bytes());
        expected.extend_from_slice(&20u64.to_be_bytes());
        assert_eq!(framed, expected);

        assert_eq!(decode_client_payload(&framed[4..]), Ok(msg));
    }

    #[test]
    fn absent_tob_sides_encode_as_zeros() {
        let tob = TopOfBook {
            has_bid: true,
            bid_price: 100.0,
            bid_quantity: 10,
            ..Default::default()
        };
        let framed = encode_server_message(&ServerMessage::TopOfBook(tob));
        let decoded = decode_server_payload(&framed[4..]).unwrap();
        match decoded {
            ServerMessage::TopOfBook(t) => {
                assert!(t.has_bid);
                assert!(!t.has_ask);
                assert_eq!(t.ask_price, 0.0);
                assert_eq!(t.ask_quantity, 0);
            }
            other => panic!("expected TOB, got {other:?}"),
        }
    }

    #[test]
    fn pnl_position_travels_as_f64() {
        let msg = ServerMessage::Pnl(PnlUpdate {
            user_id: 7,
            realized: 12.5,
            unrealized: -3.25,
            position: -5.0,
            avg_price: 101.5,
            equity: 9.25,
        });
        let framed = encode_server_message(&msg);
        assert_eq!(framed.len(), 4 + 1 + 4 + 5 * 8);
        // position field offset: 4 len + 1 tag + 4 user + 16 pnl fields
        let bits = u64::from_be_bytes(framed[25..33].try_into().unwrap());
        assert_eq!(f64::from_bits(bits), -5.0);
        assert_eq!(decode_server_payload(&framed[4..]).unwrap(), msg);
    }

    #[test]
    fn assembler_reassembles_split_frames() {
        let a = encode_client_message(&ClientMessage::Cancel(CancelRequest { order_id: 11 }));
        let b = encode_client_message(&ClientMessage::NewOrder(NewOrder {
            user_id: 1,
            side: Side::Buy,
            price: 99.5,
            quantity: 3,
        }));
        let mut stream = Vec::new();
        stream.extend_from_slice(&a);
        stream.extend_from_slice(&b);

        let mut asm = FrameAssembler::new();
        // Feed in awkward chunks.
        for chunk in stream.chunks(3) {
            asm.extend(chunk);
        }
        let first = asm.next_payload().unwrap().unwrap();
        assert_eq!(
            decode_client_payload(&first),
            Ok(ClientMessage::Cancel(CancelRequest { order_id: 11 }))
        );
        let second = asm.next_payload().unwrap().unwrap();
        assert!(matches!(
            decode_client_payload(&second),
            Ok(ClientMessage::NewOrder(_))
        ));
        assert_eq!(asm.next_payload().unwrap(), None);
    }

    #[test]
    fn assembler_waits_for_full_payload() {
        let frame = encode_client_message(&ClientMessage::Cancel(CancelRequest { order_id: 1 }));
        let mut asm = FrameAssembler::new();
        asm.extend(&frame[..6]);
        assert_eq!(asm.next_payload().unwrap(), None);
        asm.extend(&frame[6..]);
        assert!(asm.next_payload().unwrap().is_some());
    }

    #[test]
    fn oversized_frame_is_refused() {
        let mut asm = FrameAssembler::new();
        asm.extend(&(MAX_FRAME_LEN + 1).to_be_bytes());
        assert_eq!(
            asm.next_payload(),
            Err(WireError::FrameTooLarge { len: MAX_FRAME_LEN + 1 })
        );
    }

    #[test]
    fn unknown_tag_and_bad_side_are_errors() {
        assert_eq!(decode_client_payload(&[42]), Err(WireError::UnknownType(42)));
        // NEW_ORDER with side byte 7.
        let mut p = vec![1u8];
        p.extend_from_slice(&1u64.to_be_bytes());
        p.push(7);
        p.extend_from_slice(&100.0f64.to_bits().to_be_bytes());
        p.extend_from_slice(&1u64.to_be_bytes());
        assert_eq!(decode_client_payload(&p), Err(WireError::InvalidSide(7)));
    }

    #[test]
    fn truncated_payload_is_an_error() {
        let framed = encode_server_message(&ServerMessage::Ack(Ack {
            status: AckStatus::Ok,
            kind: MsgType::NewOrder,
            order_id: 5,
        }));
        let payload = &framed[4..];
        assert_eq!(decode_server_payload(&payload[..5]), Err(WireError::Truncated));
    }

    #[test]
    fn server_messages_round_trip() {
        let messages = [
            ServerMessage::Ack(Ack {
                status: AckStatus::Error,
                kind: MsgType::Cancel,
                order_id: 424242,
            }),
            ServerMessage::L2(L2Update { side: Side::Sell, price: 101.0, quantity: 0 }),
        ];
        for msg in messages {
            let framed = encode_server_message(&msg);
            assert_eq!(decode_server_payload(&framed[4..]).unwrap(), msg);
        }
    }
}
