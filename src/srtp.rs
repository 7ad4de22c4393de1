use std::fmt;

/// SRTP protection profiles negotiable through the DTLS-SRTP extension.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum SrtpProfile {
    AeadAes128Gcm,
    AeadAes256Gcm,
    Aes128CmHmacSha1_80,
    Aes128CmHmacSha1_32,
}

impl SrtpProfile {
    /// Profile name as registered with OpenSSL's `use_srtp` extension.
    pub fn openssl_name(&self) -> &'static str {
        match self {
            SrtpProfile::AeadAes128Gcm => "SRTP_AEAD_AES_128_GCM",
            SrtpProfile::AeadAes256Gcm => "SRTP_AEAD_AES_256_GCM",
            SrtpProfile::Aes128CmHmacSha1_80 => "SRTP_AES128_CM_SHA1_80",
            SrtpProfile::Aes128CmHmacSha1_32 => "SRTP_AES128_CM_SHA1_32",
        }
    }

    pub fn from_openssl_name(name: &str) -> Option<SrtpProfile> {
        match name {
            "SRTP_AEAD_AES_128_GCM" => Some(SrtpProfile::AeadAes128Gcm),
            "SRTP_AEAD_AES_256_GCM" => Some(SrtpProfile::AeadAes256Gcm),
            "SRTP_AES128_CM_SHA1_80" => Some(SrtpProfile::Aes128CmHmacSha1_80),
            "SRTP_AES128_CM_SHA1_32" => Some(SrtpProfile::Aes128CmHmacSha1_32),
            _ => None,
        }
    }
}

impl fmt::Display for SrtpProfile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.openssl_name())
    }
}

/// SRTP-related knobs of [`CryptoOptions`].
#[derive(Debug, Clone)]
pub struct SrtpOptions {
    /// Offer the AES-GCM cipher suites in addition to the AES-CM ones.
    pub enable_gcm_crypto_suites: bool,
    /// Offer the weaker 32-bit-auth AES-CM suite as a fallback.
    pub enable_aes128_sha1_32_crypto_cipher: bool,
    /// Negotiate encryption of RTP header extensions (RFC 6904).
    pub enable_encrypted_rtp_header_extensions: bool,
}

impl Default for SrtpOptions {
    fn default() -> Self {
        SrtpOptions {
            enable_gcm_crypto_suites: true,
            enable_aes128_sha1_32_crypto_cipher: false,
            enable_encrypted_rtp_header_extensions: false,
        }
    }
}

/// Crypto configuration supplied by the application when the transport is
/// constructed. Translated once into the ordered SRTP profile list offered
/// during the DTLS-SRTP handshake.
#[derive(Debug, Clone, Default)]
pub struct CryptoOptions {
    pub srtp: SrtpOptions,
    /// Require frame-level encryption on top of SRTP for media sent through
    /// this transport.
    pub require_frame_encryption: bool,
}

impl CryptoOptions {
    /// The ordered list of SRTP protection profiles to offer, strongest
    /// first.
    pub fn srtp_profiles(&self) -> Vec<SrtpProfile> {
        let mut profiles = vec![];
        if self.srtp.enable_gcm_crypto_suites {
            profiles.push(SrtpProfile::AeadAes128Gcm);
            profiles.push(SrtpProfile::AeadAes256Gcm);
        }
        profiles.push(SrtpProfile::Aes128CmHmacSha1_80);
        if self.srtp.enable_aes128_sha1_32_crypto_cipher {
            profiles.push(SrtpProfile::Aes128CmHmacSha1_32);
        }
        profiles
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_default_profiles() {
        let profiles = CryptoOptions::default().srtp_profiles();
        assert_eq!(
            profiles,
            vec![
                SrtpProfile::AeadAes128Gcm,
                SrtpProfile::AeadAes256Gcm,
                SrtpProfile::Aes128CmHmacSha1_80,
            ]
        );
    }

    #[test]
    fn test_minimal_profiles() {
        let options = CryptoOptions {
            srtp: SrtpOptions {
                enable_gcm_crypto_suites: false,
                enable_aes128_sha1_32_crypto_cipher: true,
                ..Default::default()
            },
            ..Default::default()
        };
        assert_eq!(
            options.srtp_profiles(),
            vec![
                SrtpProfile::Aes128CmHmacSha1_80,
                SrtpProfile::Aes128CmHmacSha1_32,
            ]
        );
    }

    #[test]
    fn test_openssl_name_round_trip() {
        for profile in [
            SrtpProfile::AeadAes128Gcm,
            SrtpProfile::AeadAes256Gcm,
            SrtpProfile::Aes128CmHmacSha1_80,
            SrtpProfile::Aes128CmHmacSha1_32,
        ] {
            assert_eq!(
                SrtpProfile::from_openssl_name(profile.openssl_name()),
                Some(profile)
            );
        }
    }
}
