//! Stream encryption and session digest support for the login handshake.
//!
//! The server drives encryption: it sends its RSA public key and a verify token, the client
//! answers with a freshly generated shared secret, and both sides install AES-128/CFB8 on the
//! socket from that point on. The cipher is stateful in both directions, so reads and writes must
//! each stay strictly ordered.

use aes::cipher::generic_array::GenericArray;
use aes::cipher::{BlockDecryptMut, BlockEncryptMut};
use cfb8::cipher::KeyIvInit;
use num_bigint::BigInt;
use rand::RngCore;
use rand::rngs::OsRng;
use rsa::pkcs8::DecodePublicKey;
use rsa::{Pkcs1v15Encrypt, RsaPublicKey};
use sha1::{Digest, Sha1};
use std::pin::Pin;
use std::task::{Context, Poll};
use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};

pub type Aes128Cfb8Enc = cfb8::Encryptor<aes::Aes128>;
pub type Aes128Cfb8Dec = cfb8::Decryptor<aes::Aes128>;

/// The internal error type for all errors related to cryptography.
#[derive(thiserror::Error, Debug)]
pub enum Error {
    /// The server public key could not be decoded from its DER form.
    #[error("could not decode the server public key: {0}")]
    BadPublicKey(#[from] rsa::pkcs8::spki::Error),

    /// The RSA encryption of the login secrets failed.
    #[error("rsa encryption failed: {0}")]
    Rsa(#[from] rsa::Error),

    /// The shared secret has an invalid length for the stream cipher.
    #[error("invalid cipher key length: {0}")]
    InvalidCipherLength(#[from] cfb8::cipher::InvalidLength),
}

/// Generates the 16-byte shared secret for one encrypted session.
pub fn generate_shared_secret() -> [u8; 16] {
    let mut secret = [0u8; 16];
    OsRng.fill_bytes(&mut secret);
    secret
}

/// Encrypts a login secret with the server's DER-encoded RSA public key (PKCS#1 v1.5).
pub fn encrypt_with_server_key(encoded_public: &[u8], value: &[u8]) -> Result<Vec<u8>, Error> {
    let key = RsaPublicKey::from_public_key_der(encoded_public)?;
    Ok(key.encrypt(&mut OsRng, Pkcs1v15Encrypt, value)?)
}

/// Computes the legacy SHA1 session digest sent to the session server.
///
/// The digest bytes are interpreted as a signed big-endian integer and rendered in hex, which
/// yields the leading-minus form Mojang expects.
pub fn session_hash(server_id: &str, shared_secret: &[u8], encoded_public: &[u8]) -> String {
    let mut hasher = Sha1::new();
    hasher.update(server_id.as_bytes());
    hasher.update(shared_secret);
    hasher.update(encoded_public);

    BigInt::from_signed_bytes_be(&hasher.finalize()).to_str_radix(16)
}

pub fn create_ciphers(shared_secret: &[u8]) -> Result<(Aes128Cfb8Enc, Aes128Cfb8Dec), Error> {
    let encryptor = Aes128Cfb8Enc::new_from_slices(shared_secret, shared_secret)?;
    let decryptor = Aes128Cfb8Dec::new_from_slices(shared_secret, shared_secret)?;

    Ok((encryptor, decryptor))
}

/// A [`CipherStream`] wraps an [`AsyncRead`] + [`AsyncWrite`] such that any bytes read or written
/// are decrypted/encrypted with the session ciphers once they are installed.
///
/// CFB8 turns the block cipher into a self-synchronizing stream: one plaintext byte in, one
/// ciphertext byte out, with the cipher state advancing per byte. Because that state advance is
/// irreversible, a write chunk is encrypted exactly once into `staged` and the ciphertext is then
/// drained to the transport over however many polls it takes; re-encrypting on a retried poll
/// would desynchronize the stream.
pub struct CipherStream<S> {
    inner: S,
    encryptor: Option<Aes128Cfb8Enc>,
    decryptor: Option<Aes128Cfb8Dec>,
    /// Ciphertext of the in-flight write chunk that the transport has not accepted yet.
    staged: Vec<u8>,
    /// Plaintext length of the in-flight chunk, reported once `staged` is fully drained.
    claimed: usize,
}

impl<S> CipherStream<S> {
    pub fn new(inner: S) -> Self {
        Self {
            inner,
            encryptor: None,
            decryptor: None,
            staged: Vec::new(),
            claimed: 0,
        }
    }

    /// Installs the session ciphers. All traffic from this point on is encrypted.
    pub fn enable_encryption(&mut self, shared_secret: &[u8]) -> Result<(), Error> {
        let (encryptor, decryptor) = create_ciphers(shared_secret)?;
        self.encryptor = Some(encryptor);
        self.decryptor = Some(decryptor);

        Ok(())
    }

    pub fn is_encrypted(&self) -> bool {
        self.encryptor.is_some()
    }
}

impl<S> CipherStream<S>
where
    S: AsyncWrite + Unpin,
{
    /// Pushes staged ciphertext into the transport until it is gone or the transport blocks.
    fn poll_drain_staged(
        &mut self,
        cx: &mut Context<'_>,
    ) -> Poll<Result<(), std::io::Error>> {
        while !self.staged.is_empty() {
            let written =
                std::task::ready!(Pin::new(&mut self.inner).poll_write(cx, &self.staged))?;
            if written == 0 {
                return Poll::Ready(Err(std::io::ErrorKind::WriteZero.into()));
            }
            self.staged.drain(..written);
        }
        Poll::Ready(Ok(()))
    }
}

impl<S> AsyncWrite for CipherStream<S>
where
    S: AsyncWrite + Unpin,
{
    fn poll_write(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<Result<usize, std::io::Error>> {
        let this = self.get_mut();

        // `claimed == 0` marks a fresh chunk; a retried poll for the same chunk skips straight
        // to draining what was already encrypted
        if this.claimed == 0 {
            let Some(encryptor) = this.encryptor.as_mut() else {
                return Pin::new(&mut this.inner).poll_write(cx, buf);
            };
            if buf.is_empty() {
                return Poll::Ready(Ok(0));
            }
            this.claimed = buf.len();
            this.staged.reserve(buf.len());
            for &byte in buf {
                let mut cipher_byte = [byte];
                encryptor.encrypt_block_mut(GenericArray::from_mut_slice(&mut cipher_byte));
                this.staged.push(cipher_byte[0]);
            }
        }

        std::task::ready!(this.poll_drain_staged(cx))?;
        Poll::Ready(Ok(std::mem::take(&mut this.claimed)))
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Result<(), std::io::Error>> {
        let this = self.get_mut();
        std::task::ready!(this.poll_drain_staged(cx))?;
        Pin::new(&mut this.inner).poll_flush(cx)
    }

    fn poll_shutdown(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
    ) -> Poll<Result<(), std::io::Error>> {
        let this = self.get_mut();
        std::task::ready!(this.poll_drain_staged(cx))?;
        Pin::new(&mut this.inner).poll_shutdown(cx)
    }
}

impl<S> AsyncRead for CipherStream<S>
where
    S: AsyncRead + Unpin,
{
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<std::io::Result<()>> {
        let this = self.get_mut();

        if this.decryptor.is_none() {
            return Pin::new(&mut this.inner).poll_read(cx, buf);
        }

        let already_filled = buf.filled().len();
        std::task::ready!(Pin::new(&mut this.inner).poll_read(cx, buf))?;

        // whatever this poll appended is ciphertext; decrypt it in place byte by byte
        if let Some(decryptor) = this.decryptor.as_mut() {
            for byte in &mut buf.filled_mut()[already_filled..] {
                decryptor
                    .decrypt_block_mut(GenericArray::from_mut_slice(std::slice::from_mut(byte)));
            }
        }

        Poll::Ready(Ok(()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};

    #[test]
    fn session_hash_matches_known_vectors() {
        // the published test vectors for the legacy session digest
        assert_eq!(
            session_hash("Notch", b"", b""),
            "4ed1f46bbe04bc756bcb17c0c7ce3e4632f06a48"
        );
        assert_eq!(
            session_hash("jeb_", b"", b""),
            "-7c9d5b0044c130109a5d7b5fb5c317c02b4e28c1"
        );
        assert_eq!(
            session_hash("simon", b"", b""),
            "88e16a1019277b15d58faf0541e11910eb756f6"
        );
    }

    #[tokio::test]
    async fn cipher_stream_roundtrip() {
        let secret = generate_shared_secret();
        let (client, server) = tokio::io::duplex(1024);
        let mut client = CipherStream::new(client);
        let mut server = CipherStream::new(server);
        client.enable_encryption(&secret).expect("client ciphers failed");
        server.enable_encryption(&secret).expect("server ciphers failed");

        client.write_all(b"attack at dawn").await.expect("write failed");
        client.flush().await.expect("flush failed");

        let mut received = [0u8; 14];
        server.read_exact(&mut received).await.expect("read failed");
        assert_eq!(&received, b"attack at dawn");
    }

    #[tokio::test]
    async fn staged_ciphertext_survives_a_tiny_transport() {
        let secret = generate_shared_secret();
        // a 4-byte pipe forces the writer through repeated partial writes
        let (client, server) = tokio::io::duplex(4);
        let mut client = CipherStream::new(client);
        let mut server = CipherStream::new(server);
        client.enable_encryption(&secret).expect("client ciphers failed");
        server.enable_encryption(&secret).expect("server ciphers failed");

        let payload: Vec<u8> = (0u8..64).collect();
        let expected = payload.clone();
        let writer = tokio::spawn(async move {
            client.write_all(&payload).await.expect("write failed");
            client.flush().await.expect("flush failed");
        });

        let mut received = vec![0u8; 64];
        server.read_exact(&mut received).await.expect("read failed");
        assert_eq!(received, expected);
        writer.await.expect("writer task failed");
    }

    #[tokio::test]
    async fn plaintext_before_encryption() {
        let (client, server) = tokio::io::duplex(1024);
        let mut client = CipherStream::new(client);
        let mut server = CipherStream::new(server);
        assert!(!client.is_encrypted());

        client.write_all(b"status").await.expect("write failed");
        let mut received = [0u8; 6];
        server.read_exact(&mut received).await.expect("read failed");
        assert_eq!(&received, b"status");
    }
}
