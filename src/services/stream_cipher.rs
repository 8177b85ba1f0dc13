//! Transparent AES-256-CBC wrapping of byte streams
//!
//! Archives are framed as `IV || CBC(PKCS#7(plaintext))`, the IV being 16
//! random bytes written in clear. The key is the SHA-256 digest of an
//! arbitrary passphrase, so any string or byte sequence is a usable key.
//!
//! Writers encrypt whole blocks as they arrive and keep the partial tail
//! buffered until [`TransformWriter::finish`]. Readers decrypt the whole
//! remaining ciphertext on first read and serve slices of the plaintext.
//!
//! Every call to [`StreamTransform::writer`] or [`StreamTransform::reader`]
//! creates fresh cipher state; wrappers are never shared between streams.

use aes::cipher::generic_array::GenericArray;
use aes::cipher::{BlockDecryptMut, BlockEncryptMut, KeyIvInit};
use aes::Aes256;
use cbc::cipher::block_padding::Pkcs7;
use rand::RngCore;
use sha2::{Digest, Sha256};
use std::fmt;
use std::io::{self, Read, Write};

/// AES block size in bytes, also the IV length
pub const BLOCK_SIZE: usize = 16;
const KEY_SIZE: usize = 32;

type Aes256CbcEnc = cbc::Encryptor<Aes256>;
type Aes256CbcDec = cbc::Decryptor<Aes256>;

/// Errors raised while decrypting an archive
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CipherError {
    /// Fewer bytes than one IV, or no ciphertext block after it
    TooShort(usize),
    /// Ciphertext length is not a multiple of the block size
    Misaligned(usize),
    /// Final padding byte outside `[1, BLOCK_SIZE]` or inconsistent pad bytes
    BadPadding(u8),
}

impl fmt::Display for CipherError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CipherError::TooShort(len) => {
                write!(f, "encrypted stream too short ({} bytes)", len)
            }
            CipherError::Misaligned(len) => {
                write!(f, "ciphertext length {} is not block aligned", len)
            }
            CipherError::BadPadding(value) => write!(f, "invalid padding byte {}", value),
        }
    }
}

impl std::error::Error for CipherError {}

impl From<CipherError> for io::Error {
    fn from(e: CipherError) -> Self {
        io::Error::new(io::ErrorKind::InvalidData, e)
    }
}

/// Symmetric key derived from a passphrase
#[derive(Clone, PartialEq, Eq)]
pub struct CipherKey([u8; KEY_SIZE]);

impl CipherKey {
    /// SHA-256 of the passphrase bytes
    pub fn from_passphrase(passphrase: impl AsRef<[u8]>) -> Self {
        let digest = Sha256::digest(passphrase.as_ref());
        let mut key = [0u8; KEY_SIZE];
        key.copy_from_slice(&digest);
        Self(key)
    }

    /// Uses `bytes` directly as the AES-256 key
    pub fn from_raw(bytes: [u8; KEY_SIZE]) -> Self {
        Self(bytes)
    }

    fn encryptor(&self, iv: &[u8; BLOCK_SIZE]) -> Aes256CbcEnc {
        Aes256CbcEnc::new(GenericArray::from_slice(&self.0), GenericArray::from_slice(iv))
    }

    fn decryptor(&self, iv: &[u8; BLOCK_SIZE]) -> Aes256CbcDec {
        Aes256CbcDec::new(GenericArray::from_slice(&self.0), GenericArray::from_slice(iv))
    }
}

impl fmt::Debug for CipherKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("CipherKey(..)")
    }
}

/// Selects how archive bytes are wrapped: clear or encrypted
#[derive(Debug, Clone)]
pub enum StreamTransform {
    Identity,
    Aes(CipherKey),
}

impl StreamTransform {
    pub fn identity() -> Self {
        StreamTransform::Identity
    }

    pub fn aes(passphrase: impl AsRef<[u8]>) -> Self {
        StreamTransform::Aes(CipherKey::from_passphrase(passphrase))
    }

    pub fn is_encrypting(&self) -> bool {
        matches!(self, StreamTransform::Aes(_))
    }

    /// Wraps `inner` for writing; call [`TransformWriter::finish`] when done
    pub fn writer<W: Write>(&self, inner: W) -> TransformWriter<W> {
        match self {
            StreamTransform::Identity => TransformWriter::Plain(inner),
            StreamTransform::Aes(key) => {
                TransformWriter::Encrypted(EncryptingWriter::new(inner, key.clone()))
            }
        }
    }

    pub fn reader<R: Read>(&self, inner: R) -> TransformReader<R> {
        match self {
            StreamTransform::Identity => TransformReader::Plain(inner),
            StreamTransform::Aes(key) => {
                TransformReader::Decrypted(DecryptingReader::new(inner, key.clone()))
            }
        }
    }
}

pub enum TransformWriter<W: Write> {
    Plain(W),
    Encrypted(EncryptingWriter<W>),
}

impl<W: Write> TransformWriter<W> {
    /// Writes any pending tail (padding for the cipher) and hands back the sink
    pub fn finish(self) -> io::Result<W> {
        match self {
            TransformWriter::Plain(mut inner) => {
                inner.flush()?;
                Ok(inner)
            }
            TransformWriter::Encrypted(writer) => writer.finish(),
        }
    }
}

impl<W: Write> Write for TransformWriter<W> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        match self {
            TransformWriter::Plain(inner) => inner.write(buf),
            TransformWriter::Encrypted(writer) => writer.write(buf),
        }
    }

    fn flush(&mut self) -> io::Result<()> {
        match self {
            TransformWriter::Plain(inner) => inner.flush(),
            TransformWriter::Encrypted(writer) => writer.flush(),
        }
    }
}

pub enum TransformReader<R: Read> {
    Plain(R),
    Decrypted(DecryptingReader<R>),
}

impl<R: Read> Read for TransformReader<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        match self {
            TransformReader::Plain(inner) => inner.read(buf),
            TransformReader::Decrypted(reader) => reader.read(buf),
        }
    }
}

/// Encrypting side of the wrapper
pub struct EncryptingWriter<W: Write> {
    inner: W,
    key: CipherKey,
    iv: Option<[u8; BLOCK_SIZE]>,
    cipher: Option<Aes256CbcEnc>,
    pending: Vec<u8>,
}

impl<W: Write> EncryptingWriter<W> {
    pub fn new(inner: W, key: CipherKey) -> Self {
        Self {
            inner,
            key,
            iv: None,
            cipher: None,
            pending: Vec::with_capacity(BLOCK_SIZE),
        }
    }

    #[cfg(test)]
    fn with_iv(inner: W, key: CipherKey, iv: [u8; BLOCK_SIZE]) -> Self {
        let mut writer = Self::new(inner, key);
        writer.iv = Some(iv);
        writer
    }

    /// Emits the IV prefix on first use
    fn cipher(&mut self) -> io::Result<&mut Aes256CbcEnc> {
        if self.cipher.is_none() {
            let iv = match self.iv {
                Some(iv) => iv,
                None => {
                    let mut iv = [0u8; BLOCK_SIZE];
                    rand::rng().fill_bytes(&mut iv);
                    iv
                }
            };
            self.inner.write_all(&iv)?;
            self.cipher = Some(self.key.encryptor(&iv));
        }
        self.cipher
            .as_mut()
            .ok_or_else(|| io::Error::other("cipher not initialised"))
    }

    /// Pads the tail, writes the last block and returns the sink
    ///
    /// Block-aligned input still gets a full block of padding.
    pub fn finish(mut self) -> io::Result<W> {
        self.cipher()?;
        let cipher = self
            .cipher
            .take()
            .ok_or_else(|| io::Error::other("cipher not initialised"))?;

        // `write` leaves less than one block pending
        let tail_len = self.pending.len();
        let mut block = [0u8; BLOCK_SIZE];
        block[..tail_len].copy_from_slice(&self.pending);
        let last = cipher
            .encrypt_padded_mut::<Pkcs7>(&mut block, tail_len)
            .map_err(|_| io::Error::other("final block does not fit its padding"))?;
        self.inner.write_all(last)?;
        self.inner.flush()?;
        Ok(self.inner)
    }
}

impl<W: Write> Write for EncryptingWriter<W> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.cipher()?;
        self.pending.extend_from_slice(buf);

        let whole = self.pending.len() / BLOCK_SIZE * BLOCK_SIZE;
        if whole > 0 {
            let mut blocks: Vec<u8> = self.pending.drain(..whole).collect();
            encrypt_blocks(self.cipher()?, &mut blocks);
            self.inner.write_all(&blocks)?;
        }
        Ok(buf.len())
    }

    /// Flushes the sink; a partial block stays buffered until `finish`
    fn flush(&mut self) -> io::Result<()> {
        self.inner.flush()
    }
}

/// Decrypting side of the wrapper
pub struct DecryptingReader<R: Read> {
    inner: R,
    key: CipherKey,
    plaintext: Option<Vec<u8>>,
    position: usize,
}

impl<R: Read> DecryptingReader<R> {
    pub fn new(inner: R, key: CipherKey) -> Self {
        Self {
            inner,
            key,
            plaintext: None,
            position: 0,
        }
    }

    fn load(&mut self) -> io::Result<&[u8]> {
        if self.plaintext.is_none() {
            let mut data = Vec::new();
            self.inner.read_to_end(&mut data)?;
            self.plaintext = Some(decrypt(&self.key, &data)?);
        }
        Ok(self.plaintext.as_deref().unwrap_or_default())
    }
}

impl<R: Read> Read for DecryptingReader<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let position = self.position;
        let plaintext = self.load()?;
        let remaining = &plaintext[position.min(plaintext.len())..];
        let count = remaining.len().min(buf.len());
        buf[..count].copy_from_slice(&remaining[..count]);
        self.position += count;
        Ok(count)
    }
}

/// Decrypts a complete `IV || ciphertext` buffer
pub fn decrypt(key: &CipherKey, framed: &[u8]) -> Result<Vec<u8>, CipherError> {
    if framed.len() < 2 * BLOCK_SIZE {
        return Err(CipherError::TooShort(framed.len()));
    }
    let (iv, ciphertext) = framed.split_at(BLOCK_SIZE);
    if ciphertext.len() % BLOCK_SIZE != 0 {
        return Err(CipherError::Misaligned(ciphertext.len()));
    }

    let mut iv_block = [0u8; BLOCK_SIZE];
    iv_block.copy_from_slice(iv);
    let mut plaintext = ciphertext.to_vec();
    let body_len = match key.decryptor(&iv_block).decrypt_padded_mut::<Pkcs7>(&mut plaintext) {
        Ok(body) => body.len(),
        Err(_) => return Err(CipherError::BadPadding(plaintext[plaintext.len() - 1])),
    };
    plaintext.truncate(body_len);
    Ok(plaintext)
}

/// Encrypts `data` in one go with a fresh random IV
pub fn encrypt(key: &CipherKey, data: &[u8]) -> io::Result<Vec<u8>> {
    let mut writer = EncryptingWriter::new(Vec::with_capacity(data.len() + 2 * BLOCK_SIZE), key.clone());
    writer.write_all(data)?;
    writer.finish()
}

fn encrypt_blocks(cipher: &mut Aes256CbcEnc, data: &mut [u8]) {
    for block in data.chunks_exact_mut(BLOCK_SIZE) {
        cipher.encrypt_block_mut(GenericArray::from_mut_slice(block));
    }
}
