//! Test utilities & fixtures.
//! A small postal code table around Hamburg plus helpers for building a dispatcher
//! wired to the in-memory mesh client.
#![allow(dead_code)]

use rand::rngs::StdRng;
use rand::SeedableRng;
use std::path::{Path, PathBuf};

use volley::bot::reply::RESPONSE_EMOJIS;
use volley::bot::Dispatcher;
use volley::config::Config;
use volley::geo::{Coordinates, GeoRecord, GeoTable};
use volley::mesh::mock::MockMesh;
use volley::mesh::{ChannelMessage, Contact, DeviceIdentity, DirectMessage, MeshEvent};

pub const HAMBURG: Coordinates = Coordinates {
    lat: 53.5511,
    lon: 9.9937,
};
pub const ALTONA: Coordinates = Coordinates {
    lat: 53.5522,
    lon: 9.9350,
};
pub const BERLIN: Coordinates = Coordinates {
    lat: 52.5323,
    lon: 13.3846,
};

/// Directory holding static fixture files.
pub fn fixture_root() -> PathBuf {
    Path::new(env!("CARGO_MANIFEST_DIR"))
        .join("tests")
        .join("test-data")
}

fn record(zip: &str, place: &str, prefix: &str, coords: Option<Coordinates>) -> GeoRecord {
    GeoRecord {
        zipcode: zip.to_string(),
        place: place.to_string(),
        extra: String::new(),
        prefix: prefix.to_string(),
        state: String::new(),
        lat: coords.map(|c| c.lat),
        lon: coords.map(|c| c.lon),
    }
}

pub fn geo_table() -> GeoTable {
    GeoTable::from_records(vec![
        record("22767", "Hamburg", "040", Some(ALTONA)),
        record("20095", "Hamburg", "040", Some(HAMBURG)),
        record("10115", "Berlin", "030", Some(BERLIN)),
        record("25999", "Kampen", "04651", None),
    ])
}

pub fn device() -> DeviceIdentity {
    DeviceIdentity {
        name: "volley-test".to_string(),
        public_key: "ff00ff00".to_string(),
        lat: HAMBURG.lat,
        lon: HAMBURG.lon,
    }
}

pub fn test_config() -> Config {
    let mut config = Config::default();
    config.bot.channel = 1;
    config
}

pub fn bot_with(mock: &MockMesh, config: &Config) -> Dispatcher<MockMesh, GeoTable> {
    Dispatcher::new(mock.clone(), geo_table(), config, device()).with_rng(StdRng::seed_from_u64(7))
}

pub fn bot(mock: &MockMesh) -> Dispatcher<MockMesh, GeoTable> {
    bot_with(mock, &test_config())
}

pub fn channel_msg(channel: u8, text: &str) -> MeshEvent {
    MeshEvent::ChannelMessage(ChannelMessage {
        channel,
        text: text.to_string(),
        snr: None,
        rssi: None,
        path_len: None,
    })
}

pub fn direct_msg(prefix: &str, text: &str) -> MeshEvent {
    MeshEvent::DirectMessage(DirectMessage {
        pubkey_prefix: prefix.to_string(),
        text: text.to_string(),
        snr: None,
        rssi: None,
        path_len: None,
    })
}

pub fn contact(public_key: &str, name: &str, at: Coordinates) -> Contact {
    Contact {
        public_key: public_key.to_string(),
        name: name.to_string(),
        lat: at.lat,
        lon: at.lon,
    }
}

/// Split a reply into its head (`[@[sender] ]<emoji> HH:MM:SSZ`) and the remaining fields.
pub fn reply_fields(reply: &str) -> (String, Vec<String>) {
    let mut parts = reply.split(',');
    let head = parts.next().unwrap_or_default().to_string();
    (head, parts.map(str::to_string).collect())
}

/// Assert the head is `<emoji> HH:MM:SSZ`, after removing an expected mention.
pub fn assert_head(head: &str, mention: Option<&str>) {
    let rest = match mention {
        Some(sender) => {
            let prefix = format!("@[{}] ", sender);
            assert!(head.starts_with(&prefix), "missing mention in {head:?}");
            &head[prefix.len()..]
        }
        None => {
            assert!(!head.starts_with('@'), "unexpected mention in {head:?}");
            head
        }
    };
    let (emoji, time) = rest.split_once(' ').expect("emoji and time");
    assert!(RESPONSE_EMOJIS.contains(&emoji), "unexpected emoji {emoji:?}");
    let bytes = time.as_bytes();
    assert_eq!(bytes.len(), 9, "bad time {time:?}");
    assert_eq!(bytes[2], b':');
    assert_eq!(bytes[5], b':');
    assert_eq!(bytes[8], b'Z');
    assert!([0, 1, 3, 4, 6, 7].iter().all(|&i| bytes[i].is_ascii_digit()));
}
