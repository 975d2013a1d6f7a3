//! Serde helpers for transport types embedded in persisted records.
//!
//! Peer ids and multiaddresses are persisted in their canonical string
//! forms so that stored records stay readable and schema-checked on
//! decode.

/// Serializes a [`libp2p_identity::PeerId`] as its base58 string.
pub(crate) mod peer_id {
    use std::str::FromStr;

    use libp2p_identity::PeerId;
    use serde::{Deserialize, Deserializer, Serializer, de::Error};

    pub(crate) fn serialize<S: Serializer>(id: &PeerId, ser: S) -> Result<S::Ok, S::Error> {
        ser.serialize_str(&id.to_base58())
    }

    pub(crate) fn deserialize<'de, D: Deserializer<'de>>(de: D) -> Result<PeerId, D::Error> {
        let raw = String::deserialize(de)?;
        PeerId::from_str(&raw).map_err(D::Error::custom)
    }
}

/// Serializes a `Vec<Multiaddr>` as a vector of multiaddress strings.
pub(crate) mod multiaddr_vec {
    use libp2p::Multiaddr;
    use serde::{Deserialize, Deserializer, Serializer, de::Error, ser::SerializeSeq};

    pub(crate) fn serialize<S: Serializer>(
        addrs: &[Multiaddr],
        ser: S,
    ) -> Result<S::Ok, S::Error> {
        let mut seq = ser.serialize_seq(Some(addrs.len()))?;
        for addr in addrs {
            seq.serialize_element(&addr.to_string())?;
        }
        seq.end()
    }

    pub(crate) fn deserialize<'de, D: Deserializer<'de>>(
        de: D,
    ) -> Result<Vec<Multiaddr>, D::Error> {
        let raw = Vec::<String>::deserialize(de)?;
        raw.iter().map(|a| a.parse().map_err(D::Error::custom)).collect()
    }
}
