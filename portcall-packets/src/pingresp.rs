use bytes::{Buf, BufMut, BytesMut};

use portcall_core::codec::{Decoder, Encoder, VariableByteInteger};

#[derive(PartialEq, Eq, Debug)]
pub struct PingRespPacket {}

const PACKET_TYPE: u8 = 0x0d;

impl Encoder for PingRespPacket {
    fn encode(&self, buffer: &mut BytesMut) {
        buffer.put_u8(PACKET_TYPE << 4);

        let remaining_len = 0;
        VariableByteInteger(remaining_len).encode(buffer);
    }
}

impl Decoder for PingRespPacket {
    fn decode<T: Buf>(buffer: &mut T) -> crate::Result<Self> {
        buffer.advance(1);
        Ok(Self {})
    }
}

#[cfg(test)]
mod tests {
    use bytes::{Bytes, BytesMut};

    use super::*;

    #[test]
    fn test_pingresp_encode_decode() {
        let packet = PingRespPacket {};

        let mut encoded = BytesMut::new();
        packet.encode(&mut encoded);
        assert_eq!(encoded.to_vec(), vec![0xd0, 0x00]);

        let mut bytes = Bytes::from(encoded.to_vec());
        let decoded = PingRespPacket::decode(&mut bytes).expect("decode failed");
        assert_eq!(packet, decoded);
    }
}
