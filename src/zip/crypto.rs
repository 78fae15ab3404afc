//! Traditional PKWARE encryption ("ZipCrypto").
//!
//! Weak by modern standards, but still what most archivers emit for
//! password-protected files.

/// Length of the encryption header that precedes the entry data.
pub const HEADER_LEN: usize = 12;

const CRC_TABLE: [u32; 256] = crc_table();

const fn crc_table() -> [u32; 256] {
    let mut table = [0u32; 256];
    let mut i = 0;
    while i < 256 {
        let mut c = i as u32;
        let mut k = 0;
        while k < 8 {
            c = if c & 1 != 0 { 0xEDB8_8320 ^ (c >> 1) } else { c >> 1 };
            k += 1;
        }
        table[i] = c;
        i += 1;
    }
    table
}

fn crc_byte(crc: u32, b: u8) -> u32 {
    CRC_TABLE[((crc ^ b as u32) & 0xFF) as usize] ^ (crc >> 8)
}

/// The three rolling keys of the cipher.
#[derive(Clone)]
pub struct Keys {
    k0: u32,
    k1: u32,
    k2: u32,
}

impl Keys {
    pub fn new(passphrase: &[u8]) -> Self {
        let mut keys = Self {
            k0: 0x1234_5678,
            k1: 0x2345_6789,
            k2: 0x3456_7890,
        };
        for &b in passphrase {
            keys.update(b);
        }
        keys
    }

    fn update(&mut self, plain: u8) {
        self.k0 = crc_byte(self.k0, plain);
        self.k1 = self
            .k1
            .wrapping_add(self.k0 & 0xFF)
            .wrapping_mul(134_775_813)
            .wrapping_add(1);
        self.k2 = crc_byte(self.k2, (self.k1 >> 24) as u8);
    }

    fn stream_byte(&self) -> u8 {
        let temp = (self.k2 | 2) & 0xFFFF;
        ((temp * (temp ^ 1)) >> 8) as u8
    }

    pub fn decrypt(&mut self, data: &mut [u8]) {
        for b in data {
            let plain = *b ^ self.stream_byte();
            self.update(plain);
            *b = plain;
        }
    }

    pub fn encrypt(&mut self, data: &mut [u8]) {
        for b in data {
            let plain = *b;
            *b = plain ^ self.stream_byte();
            self.update(plain);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn table_matches_standard_crc32() {
        let crc = b"123456789".iter().fold(0xFFFF_FFFFu32, |c, &b| crc_byte(c, b)) ^ 0xFFFF_FFFF;
        assert_eq!(crc, 0xCBF4_3926);
    }

    #[test]
    fn decrypt_inverts_encrypt() {
        let mut data = b"attack at dawn".to_vec();
        Keys::new(b"secret").encrypt(&mut data);
        assert_ne!(&data, b"attack at dawn");
        Keys::new(b"secret").decrypt(&mut data);
        assert_eq!(&data, b"attack at dawn");
    }

    #[test]
    fn wrong_key_garbles() {
        let mut data = b"attack at dawn".to_vec();
        Keys::new(b"secret").encrypt(&mut data);
        Keys::new(b"guess").decrypt(&mut data);
        assert_ne!(&data, b"attack at dawn");
    }
}
