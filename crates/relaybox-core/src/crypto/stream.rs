//! Streaming AES-256-CBC transcoders
//!
//! [`EncryptingWriter`] and [`DecryptingReader`] wrap any `Write`/`Read` so
//! payloads of arbitrary size can be transcoded from one key space into
//! another with a plain `std::io::copy`, never holding more than a read
//! chunk of plaintext in memory.
//!
//! ## Wire Format
//!
//! Ciphertext is raw CBC output with PKCS#7 padding: always a non-zero
//! multiple of 16 bytes, one full padding block for block-aligned input.

use std::io::{self, Read, Write};

use aes::Aes256;
use cbc::cipher::generic_array::GenericArray;
use cbc::cipher::{BlockDecryptMut, BlockEncryptMut, KeyIvInit};
use zeroize::Zeroizing;

use super::KeyMaterial;
use crate::error::{RelayError, RelayResult};

type Aes256CbcEnc = cbc::Encryptor<Aes256>;
type Aes256CbcDec = cbc::Decryptor<Aes256>;

/// AES block size in bytes
pub const AES_BLOCK_SIZE: usize = 16;

/// Bytes pulled from the inner reader per refill
const READ_CHUNK: usize = 8192;

/// A writer that AES-encrypts everything written through it.
///
/// [`finish`](Self::finish) must be called to emit the final padded block;
/// dropping the writer without finishing leaves truncated ciphertext.
pub struct EncryptingWriter<W: Write> {
    inner: W,
    cipher: Aes256CbcEnc,
    pending: Zeroizing<Vec<u8>>,
}

impl<W: Write> EncryptingWriter<W> {
    /// Wrap `inner`, encrypting under `material`.
    pub fn new(inner: W, material: &KeyMaterial) -> RelayResult<Self> {
        let keys = material.cipher_keys()?;
        let cipher = Aes256CbcEnc::new_from_slices(&keys.key[..], &keys.iv[..])
            .map_err(|e| RelayError::Crypto(format!("Invalid AES key or IV: {}", e)))?;
        Ok(Self {
            inner,
            cipher,
            pending: Zeroizing::new(Vec::with_capacity(READ_CHUNK + AES_BLOCK_SIZE)),
        })
    }

    /// Pad and encrypt the trailing block, flush, and hand back the inner writer.
    pub fn finish(mut self) -> io::Result<W> {
        let used = self.pending.len();
        let pad = (AES_BLOCK_SIZE - used) as u8;

        let mut block = Zeroizing::new([pad; AES_BLOCK_SIZE]);
        block[..used].copy_from_slice(&self.pending);
        self.cipher
            .encrypt_block_mut(GenericArray::from_mut_slice(&mut block[..]));
        self.pending.clear();

        self.inner.write_all(&block[..])?;
        self.inner.flush()?;
        Ok(self.inner)
    }
}

impl<W: Write> Write for EncryptingWriter<W> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.pending.extend_from_slice(buf);

        let whole = self.pending.len() - self.pending.len() % AES_BLOCK_SIZE;
        if whole > 0 {
            for chunk in self.pending[..whole].chunks_exact_mut(AES_BLOCK_SIZE) {
                self.cipher
                    .encrypt_block_mut(GenericArray::from_mut_slice(chunk));
            }
            self.inner.write_all(&self.pending[..whole])?;
            self.pending.drain(..whole);
        }

        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        self.inner.flush()
    }
}

/// A reader that AES-decrypts everything read through it.
///
/// The last ciphertext block is held back until the inner reader reports
/// end of stream so its padding can be verified and stripped. Malformed
/// ciphertext surfaces as [`io::ErrorKind::InvalidData`].
pub struct DecryptingReader<R: Read> {
    inner: R,
    cipher: Aes256CbcDec,
    ciphertext: Vec<u8>,
    plaintext: Zeroizing<Vec<u8>>,
    cursor: usize,
    eof: bool,
}

impl<R: Read> DecryptingReader<R> {
    /// Wrap `inner`, decrypting under `material`.
    pub fn new(inner: R, material: &KeyMaterial) -> RelayResult<Self> {
        let keys = material.cipher_keys()?;
        let cipher = Aes256CbcDec::new_from_slices(&keys.key[..], &keys.iv[..])
            .map_err(|e| RelayError::Crypto(format!("Invalid AES key or IV: {}", e)))?;
        Ok(Self {
            inner,
            cipher,
            ciphertext: Vec::with_capacity(READ_CHUNK + AES_BLOCK_SIZE),
            plaintext: Zeroizing::new(Vec::with_capacity(READ_CHUNK + AES_BLOCK_SIZE)),
            cursor: 0,
            eof: false,
        })
    }

    fn decrypt_into_plaintext(&mut self, len: usize) {
        for chunk in self.ciphertext[..len].chunks_exact_mut(AES_BLOCK_SIZE) {
            self.cipher
                .decrypt_block_mut(GenericArray::from_mut_slice(chunk));
        }
        self.plaintext.extend_from_slice(&self.ciphertext[..len]);
        self.ciphertext.drain(..len);
    }

    fn refill(&mut self) -> io::Result<()> {
        self.plaintext.clear();
        self.cursor = 0;

        let mut chunk = [0u8; READ_CHUNK];
        let read = self.inner.read(&mut chunk)?;

        if read == 0 {
            self.eof = true;
            let len = self.ciphertext.len();
            if len == 0 || len % AES_BLOCK_SIZE != 0 {
                return Err(invalid_data(
                    "ciphertext is not a whole number of AES blocks",
                ));
            }
            self.decrypt_into_plaintext(len);
            return self.strip_padding();
        }

        self.ciphertext.extend_from_slice(&chunk[..read]);

        // The final full block may be all padding; never release it early.
        let len = self.ciphertext.len();
        let tail = match len % AES_BLOCK_SIZE {
            0 => AES_BLOCK_SIZE,
            partial => partial,
        };
        if len > tail {
            self.decrypt_into_plaintext(len - tail);
        }
        Ok(())
    }

    fn strip_padding(&mut self) -> io::Result<()> {
        let pad = match self.plaintext.last() {
            Some(&pad) => pad as usize,
            None => return Err(invalid_data("empty final block")),
        };
        let len = self.plaintext.len();
        if pad == 0 || pad > AES_BLOCK_SIZE || pad > len {
            return Err(invalid_data("invalid PKCS#7 padding"));
        }
        if self.plaintext[len - pad..].iter().any(|&b| b as usize != pad) {
            return Err(invalid_data("invalid PKCS#7 padding"));
        }
        self.plaintext.truncate(len - pad);
        Ok(())
    }
}

impl<R: Read> Read for DecryptingReader<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        loop {
            if self.cursor < self.plaintext.len() {
                let available = &self.plaintext[self.cursor..];
                let n = available.len().min(buf.len());
                buf[..n].copy_from_slice(&available[..n]);
                self.cursor += n;
                return Ok(n);
            }
            if self.eof {
                return Ok(0);
            }
            self.refill()?;
        }
    }
}

fn invalid_data(msg: &str) -> io::Error {
    io::Error::new(io::ErrorKind::InvalidData, msg.to_string())
}

/// Map a transcoding I/O error onto the relay error taxonomy.
///
/// Malformed ciphertext becomes [`RelayError::DecryptionFailed`]; everything
/// else stays an I/O error.
pub(crate) fn classify_io_error(err: io::Error) -> RelayError {
    if err.kind() == io::ErrorKind::InvalidData {
        RelayError::DecryptionFailed(err.to_string())
    } else {
        RelayError::Io(err)
    }
}

/// Encrypt a whole buffer in memory.
pub fn encrypt_to_vec(plaintext: &[u8], material: &KeyMaterial) -> RelayResult<Vec<u8>> {
    let mut writer = EncryptingWriter::new(Vec::new(), material)?;
    writer.write_all(plaintext)?;
    Ok(writer.finish()?)
}

/// Decrypt a whole buffer in memory.
pub fn decrypt_to_vec(ciphertext: &[u8], material: &KeyMaterial) -> RelayResult<Zeroizing<Vec<u8>>> {
    let mut reader = DecryptingReader::new(ciphertext, material)?;
    let mut plaintext = Zeroizing::new(Vec::new());
    reader
        .read_to_end(&mut plaintext)
        .map_err(classify_io_error)?;
    Ok(plaintext)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn material() -> KeyMaterial {
        KeyMaterial::generate()
    }

    fn payload(len: usize) -> Vec<u8> {
        (0..len).map(|i| (i % 251) as u8).collect()
    }

    #[test]
    fn test_roundtrip_block_boundaries() {
        let key = material();
        for len in [0usize, 1, 15, 16, 17, 8191, 8192, 8193, 20_000] {
            let plaintext = payload(len);
            let ciphertext = encrypt_to_vec(&plaintext, &key).unwrap();
            let decrypted = decrypt_to_vec(&ciphertext, &key).unwrap();
            assert_eq!(decrypted.as_slice(), plaintext.as_slice(), "len {}", len);
        }
    }

    #[test]
    fn test_ciphertext_length_is_padded() {
        let key = material();
        assert_eq!(encrypt_to_vec(b"", &key).unwrap().len(), 16);
        assert_eq!(encrypt_to_vec(&[0u8; 15], &key).unwrap().len(), 16);
        assert_eq!(encrypt_to_vec(&[0u8; 16], &key).unwrap().len(), 32);
    }

    #[test]
    fn test_small_writes_match_single_write() {
        let key = KeyMaterial::new(vec![3u8; 48], vec![4u8; 16]).unwrap();
        let plaintext = payload(1000);

        let whole = encrypt_to_vec(&plaintext, &key).unwrap();

        let mut writer = EncryptingWriter::new(Vec::new(), &key).unwrap();
        for byte in &plaintext {
            writer.write_all(std::slice::from_ref(byte)).unwrap();
        }
        let piecewise = writer.finish().unwrap();

        assert_eq!(whole, piecewise);
    }

    #[test]
    fn test_one_byte_reads() {
        let key = material();
        let plaintext = payload(100);
        let ciphertext = encrypt_to_vec(&plaintext, &key).unwrap();

        let mut reader = DecryptingReader::new(ciphertext.as_slice(), &key).unwrap();
        let mut out = Vec::new();
        let mut byte = [0u8; 1];
        loop {
            match reader.read(&mut byte).unwrap() {
                0 => break,
                _ => out.push(byte[0]),
            }
        }
        assert_eq!(out, plaintext);
    }

    #[test]
    fn test_truncated_ciphertext_fails() {
        let key = material();
        let ciphertext = encrypt_to_vec(&payload(64), &key).unwrap();
        let result = decrypt_to_vec(&ciphertext[..ciphertext.len() - 3], &key);
        assert!(matches!(result, Err(RelayError::DecryptionFailed(_))));
    }

    #[test]
    fn test_empty_ciphertext_fails() {
        let key = material();
        assert!(matches!(
            decrypt_to_vec(&[], &key),
            Err(RelayError::DecryptionFailed(_))
        ));
    }

    #[test]
    fn test_transcode_between_keys() {
        let transport = material();
        let file = material();
        let plaintext = payload(9000);

        let inbound = encrypt_to_vec(&plaintext, &transport).unwrap();

        let mut reader = DecryptingReader::new(inbound.as_slice(), &transport).unwrap();
        let mut writer = EncryptingWriter::new(Vec::new(), &file).unwrap();
        io::copy(&mut reader, &mut writer).unwrap();
        let outbound = writer.finish().unwrap();

        assert_ne!(inbound, outbound);
        assert_eq!(decrypt_to_vec(&outbound, &file).unwrap().as_slice(), plaintext.as_slice());
    }
}
