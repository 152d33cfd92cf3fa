#![allow(dead_code)]

pub use growatt_bridge::prelude::*;

use growatt_bridge::growatt::{packet::Validator, scrambler};

pub fn common_setup() {
    growatt_bridge::init_logging("debug");
}

const SCRAMBLED: &str = concat!(
    "00bf0006010e01201f352b412238377f442c7761747447726f7761747447726f",
    "7761747447722e312a44360f3c5f462b747447726f7761747447726f77617474",
    "47726f7779727e4f4a7c77a9747447f66f77684f7447726f7761747447726f7b",
    "61747447726f77618b8bbfb96f7761747447726f77617d7447726f7761747447",
    "8d908eb1747447726f7761748bb88f637761747447726f779e8b8c8c726f7e61",
    "8b8bbea290889c787447739b7761747447726f7761747447726f18c374744901",
    "6f77701c74477d247761747447721161617454f3726f7761747447726f776174",
    "7447726f7761747447726f7761747447726f7761747447726f7761747447726f",
    "7761747447726f7761747447726f77617474477266c4",
);

const UNSCRAMBLED: &str = concat!(
    "00bf0006010e012058474436434c433836430000000000000000000000000000",
    "00000000000041464b3042484e30314a00000000000000000000000000000000",
    "0000000018060a08381300c8000000840000093b00000000000000000000000c",
    "0000000000000000fffff8cb0000000000000000000009000000000000000000",
    "fffff9d00000000000000000fffffd0c0000000000000000fffff8cb00000900",
    "fffff9d0fffffd0c000001f400000000000000000000000000006fa200000e73",
    "0000116800000f4b0000000000007e16000020b4000000000000000000000000",
    "0000000000000000000000000000000000000000000000000000000000000000",
    "000000000000000000000000000000000000000009b3",
);

fn unhex(s: &str) -> Vec<u8> {
    (0..s.len())
        .step_by(2)
        .map(|i| u8::from_str_radix(&s[i..i + 2], 16).unwrap())
        .collect()
}

pub struct Factory();
impl Factory {
    /// Smart meter frame as sent by a real datalogger, protocol 6.
    pub fn scrambled_frame() -> Vec<u8> {
        unhex(SCRAMBLED)
    }

    pub fn unscrambled_frame() -> Vec<u8> {
        unhex(UNSCRAMBLED)
    }

    pub fn invalid_crc_frame() -> Vec<u8> {
        let mut r = Self::scrambled_frame();
        r[275] = 0x71;
        r
    }

    /// Four payload bytes missing while the header still declares 270.
    pub fn invalid_size_frame() -> Vec<u8> {
        let full = Self::scrambled_frame();
        let mut r = full[..272].to_vec();
        r.extend_from_slice(&full[276..]);
        r
    }

    /// The layouts shipped in the repository.
    pub fn layouts() -> Layouts {
        Layouts::load_dir(concat!(env!("CARGO_MANIFEST_DIR"), "/layouts")).unwrap()
    }

    pub fn layout(json: &str) -> Layout {
        Layouts::from_json(json).unwrap()
    }

    /// A well formed frame around `payload` with a correct length and CRC.
    pub fn frame(protocol: u16, message_type: u16, payload: &[u8]) -> Vec<u8> {
        let mut r = vec![0x00, 0x01];
        r.extend_from_slice(&protocol.to_be_bytes());
        r.extend_from_slice(&((payload.len() + 2) as u16).to_be_bytes());
        r.extend_from_slice(&message_type.to_be_bytes());
        r.extend_from_slice(payload);
        let crc = Validator::checksum(&r);
        r.extend_from_slice(&crc.to_be_bytes());
        r
    }

    /// Like `frame`, but the payload goes out scrambled the way dataloggers
    /// send it. The CRC covers the scrambled bytes.
    pub fn scrambled(protocol: u16, message_type: u16, payload: &[u8]) -> Vec<u8> {
        let plain = Self::frame(protocol, message_type, payload);
        let mut r = scrambler::scramble(&plain[..plain.len() - 2]);
        let crc = Validator::checksum(&r);
        r.extend_from_slice(&crc.to_be_bytes());
        r
    }

    /// Inverter data payload of `len` bytes: serials at 0 and 30, date at 60,
    /// pvstatus=1 at 71, pvpowerin=2364 at 73, and pvtemperature=-12 at 233
    /// when `len` reaches that far.
    pub fn inverter_payload(len: usize) -> Vec<u8> {
        let mut r = vec![0u8; len];
        r[0..10].copy_from_slice(b"XGD6CLC86C");
        r[30..40].copy_from_slice(b"AFK0BHN01J");
        r[60..66].copy_from_slice(&[0x18, 0x06, 0x0a, 0x08, 0x38, 0x13]);
        r[71..73].copy_from_slice(&1u16.to_be_bytes());
        r[73..77].copy_from_slice(&2364u32.to_be_bytes());
        if len >= 235 {
            r[233..235].copy_from_slice(&(-12i16).to_be_bytes());
        }
        r
    }

    pub fn ack(protocol: u16, message_type: u16) -> Vec<u8> {
        Self::frame(protocol, message_type, &[0x47])
    }
}
