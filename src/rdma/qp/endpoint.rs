use crate::error::{Error, Result};
use crate::utils::serdes::{put_u16, put_u32, Reader};
use crate::verbs::types::{Gid, Lid, Psn, Qpn};

/// Identifiers one side advertises during the rendezvous: enough for the
/// peer to drive its QP to RTR/RTS, plus an opaque application payload.
///
/// Wire form, big-endian:
///
/// ```text
/// offset  size  field
///   0      2    lid
///   2      4    qp_num
///   6      4    sq_psn
///  10      4    user_data_size (N)
///  14     16    gid
///  30      N    user_data
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QpEndpoint {
    pub lid: Lid,
    pub qpn: Qpn,
    pub psn: Psn,
    pub gid: Gid,
    pub user_data: Vec<u8>,
}

impl QpEndpoint {
    /// The fixed-size part of the wire form, up to and including the GID.
    pub const HEADER_LEN: usize = 30;

    /// Serialize the full record: header, then the user data verbatim.
    ///
    /// # Panics
    ///
    /// Panics if the user data does not fit the wire's 32-bit length.
    pub fn serialize(&self) -> Vec<u8> {
        assert!(
            self.user_data.len() <= u32::MAX as usize,
            "user data too long for the wire"
        );
        let mut buf = Vec::with_capacity(Self::HEADER_LEN + self.user_data.len());
        put_u16(&mut buf, self.lid);
        put_u32(&mut buf, self.qpn);
        put_u32(&mut buf, self.psn);
        put_u32(&mut buf, self.user_data.len() as u32);
        buf.extend_from_slice(self.gid.as_bytes());
        buf.extend_from_slice(&self.user_data);
        buf
    }

    /// Parse the fixed-size header. Returns the endpoint with empty user
    /// data plus the number of payload bytes that follow on the wire.
    pub fn deserialize_header(header: &[u8; Self::HEADER_LEN]) -> Result<(QpEndpoint, usize)> {
        let mut reader = Reader::new(header);
        let lid = reader.get_u16();
        let qpn = reader.get_u32();
        let psn = reader.get_u32();
        let user_data_size = reader.get_u32();
        let gid = reader.get_bytes::<16>();
        match (lid, qpn, psn, user_data_size, gid) {
            (Some(lid), Some(qpn), Some(psn), Some(user_data_size), Some(gid)) => Ok((
                QpEndpoint {
                    lid,
                    qpn,
                    psn,
                    gid: Gid::from(gid),
                    user_data: Vec::new(),
                },
                user_data_size as usize,
            )),
            _ => Err(Error::UnexpectedClose("receiving qp header")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn endpoint(user_data: Vec<u8>) -> QpEndpoint {
        QpEndpoint {
            lid: 0x1234,
            qpn: 0xAB_CDEF,
            psn: 42,
            gid: Gid::from([7u8; 16]),
            user_data,
        }
    }

    #[test]
    fn header_layout_is_fixed() {
        let wire = endpoint(b"hi".to_vec()).serialize();
        assert_eq!(wire.len(), QpEndpoint::HEADER_LEN + 2);
        assert_eq!(&wire[0..2], &[0x12, 0x34]);
        assert_eq!(&wire[2..6], &[0x00, 0xAB, 0xCD, 0xEF]);
        assert_eq!(&wire[6..10], &[0, 0, 0, 42]);
        assert_eq!(&wire[10..14], &[0, 0, 0, 2]);
        assert_eq!(&wire[14..30], &[7u8; 16]);
        assert_eq!(&wire[30..], b"hi");
    }

    #[test]
    fn round_trip_preserves_user_data() {
        for len in [0usize, 1, 3, 255, 4096, 1 << 16] {
            let original = endpoint((0..len).map(|i| (i * 31) as u8).collect());
            let wire = original.serialize();

            let header: [u8; QpEndpoint::HEADER_LEN] =
                wire[..QpEndpoint::HEADER_LEN].try_into().unwrap();
            let (mut parsed, size) = QpEndpoint::deserialize_header(&header).unwrap();
            assert_eq!(size, len);
            parsed.user_data = wire[QpEndpoint::HEADER_LEN..].to_vec();
            assert_eq!(parsed, original);
        }
    }
}
