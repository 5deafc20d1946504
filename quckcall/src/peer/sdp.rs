//! Session description checks and the outbound quality policy.
//!
//! The policy only rewrites attribute lines; it never touches codecs or
//! ordering, so descriptions stay acceptable to any peer that accepted the
//! original.

use std::collections::HashSet;

use crate::config::EngineConfig;
use crate::error::PeerError;

/// Bitrate amendments applied to every description this client sends.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QualityPolicy {
    pub audio_bitrate_bps: u32,
    pub video_bandwidth_kbps: u32,
}

impl QualityPolicy {
    pub fn from_config(config: &EngineConfig) -> Self {
        Self {
            audio_bitrate_bps: config.audio_bitrate(),
            video_bandwidth_kbps: config.video_bandwidth_kbps,
        }
    }

    /// Raise the Opus target bitrate and cap video bandwidth.
    pub fn apply(&self, sdp: &str) -> String {
        let newline = if sdp.contains("\r\n") { "\r\n" } else { "\n" };
        let lines: Vec<&str> = sdp.lines().collect();
        let opus = opus_payload_types(&lines);
        let with_fmtp: HashSet<&str> = lines
            .iter()
            .filter_map(|line| line.strip_prefix("a=fmtp:"))
            .filter_map(|rest| rest.split_whitespace().next())
            .filter(|pt| opus.contains(*pt))
            .collect();

        let mut out: Vec<String> = Vec::with_capacity(lines.len() + 4);
        let mut in_video = false;
        let mut bandwidth_pending = false;
        for line in &lines {
            if line.starts_with("m=") {
                if bandwidth_pending {
                    self.push_bandwidth(&mut out);
                }
                in_video = line.starts_with("m=video");
                bandwidth_pending = in_video;
                out.push(line.to_string());
                continue;
            }
            if in_video {
                if line.starts_with("b=AS:") || line.starts_with("b=TIAS:") {
                    continue;
                }
                if bandwidth_pending && !line.starts_with("i=") && !line.starts_with("c=") {
                    self.push_bandwidth(&mut out);
                    bandwidth_pending = false;
                }
            }
            if let Some(rest) = line.strip_prefix("a=fmtp:") {
                let mut parts = rest.splitn(2, ' ');
                let pt = parts.next().unwrap_or_default();
                if opus.contains(pt) {
                    let params = parts.next().unwrap_or_default();
                    out.push(format!("a=fmtp:{} {}", pt, self.opus_params(params)));
                    continue;
                }
            }
            out.push(line.to_string());
            if let Some(rest) = line.strip_prefix("a=rtpmap:") {
                let pt = rest.split_whitespace().next().unwrap_or_default();
                if opus.contains(pt) && !with_fmtp.contains(pt) {
                    out.push(format!("a=fmtp:{} {}", pt, self.opus_params("")));
                }
            }
        }
        if bandwidth_pending {
            self.push_bandwidth(&mut out);
        }

        let mut result = out.join(newline);
        if sdp.ends_with('\n') {
            result.push_str(newline);
        }
        result
    }

    fn push_bandwidth(&self, out: &mut Vec<String>) {
        out.push(format!("b=AS:{}", self.video_bandwidth_kbps));
        out.push(format!("b=TIAS:{}", u64::from(self.video_bandwidth_kbps) * 1000));
    }

    fn opus_params(&self, params: &str) -> String {
        let mut pairs: Vec<(String, String)> = params
            .split(';')
            .map(str::trim)
            .filter(|p| !p.is_empty())
            .map(|p| match p.split_once('=') {
                Some((k, v)) => (k.trim().to_owned(), v.trim().to_owned()),
                None => (p.to_owned(), String::new()),
            })
            .collect();
        let mut set = |key: &str, value: String| {
            match pairs.iter_mut().find(|(k, _)| k.eq_ignore_ascii_case(key)) {
                Some(pair) => pair.1 = value,
                None => pairs.push((key.to_owned(), value)),
            }
        };
        set("maxaveragebitrate", self.audio_bitrate_bps.to_string());
        set("useinbandfec", "1".to_owned());
        pairs
            .into_iter()
            .map(|(k, v)| if v.is_empty() { k } else { format!("{k}={v}") })
            .collect::<Vec<_>>()
            .join(";")
    }
}

fn opus_payload_types<'a>(lines: &[&'a str]) -> HashSet<&'a str> {
    lines
        .iter()
        .filter_map(|line| line.strip_prefix("a=rtpmap:"))
        .filter_map(|rest| {
            let (pt, codec) = rest.split_once(' ')?;
            codec.to_ascii_lowercase().starts_with("opus/").then_some(pt)
        })
        .collect()
}

/// Reject descriptions that cannot possibly be applied: no version line or
/// no media section.
pub fn validate(sdp: &str) -> Result<(), PeerError> {
    let mut lines = sdp.lines().map(str::trim).filter(|l| !l.is_empty());
    match lines.next() {
        Some(first) if first.starts_with("v=") => {}
        _ => {
            return Err(PeerError::MalformedDescription(
                "missing version line".to_owned(),
            ));
        }
    }
    if !lines.any(|l| l.starts_with("m=")) {
        return Err(PeerError::MalformedDescription(
            "no media section".to_owned(),
        ));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    const OFFER: &str = "v=0\r\n\
        o=- 4611731400430051336 2 IN IP4 127.0.0.1\r\n\
        s=-\r\n\
        t=0 0\r\n\
        m=audio 9 UDP/TLS/RTP/SAVPF 111 0\r\n\
        c=IN IP4 0.0.0.0\r\n\
        a=rtpmap:111 opus/48000/2\r\n\
        a=fmtp:111 minptime=10;useinbandfec=0\r\n\
        a=rtpmap:0 PCMU/8000\r\n\
        m=video 9 UDP/TLS/RTP/SAVPF 96\r\n\
        c=IN IP4 0.0.0.0\r\n\
        b=AS:500\r\n\
        a=rtpmap:96 VP8/90000\r\n";

    fn policy() -> QualityPolicy {
        QualityPolicy {
            audio_bitrate_bps: 128_000,
            video_bandwidth_kbps: 2500,
        }
    }

    #[test]
    fn test_opus_fmtp_is_amended() {
        let sdp = policy().apply(OFFER);
        assert!(sdp.contains("a=fmtp:111 minptime=10;useinbandfec=1;maxaveragebitrate=128000\r\n"));
        assert!(sdp.contains("a=rtpmap:0 PCMU/8000\r\n"));
    }

    #[test]
    fn test_video_bandwidth_replaces_existing() {
        let sdp = policy().apply(OFFER);
        assert!(!sdp.contains("b=AS:500"));
        assert!(sdp.contains("m=video 9 UDP/TLS/RTP/SAVPF 96\r\nc=IN IP4 0.0.0.0\r\nb=AS:2500\r\nb=TIAS:2500000\r\na=rtpmap:96"));
        assert!(sdp.ends_with("\r\n"));
    }

    #[test]
    fn test_missing_fmtp_is_inserted() {
        let sdp = "v=0\nm=audio 9 RTP/AVP 109\na=rtpmap:109 OPUS/48000/2\n";
        let amended = policy().apply(sdp);
        assert_eq!(
            amended,
            "v=0\nm=audio 9 RTP/AVP 109\na=rtpmap:109 OPUS/48000/2\na=fmtp:109 maxaveragebitrate=128000;useinbandfec=1\n"
        );
    }

    #[test]
    fn test_audio_only_has_no_bandwidth_line() {
        let sdp = "v=0\r\nm=audio 9 RTP/AVP 111\r\na=rtpmap:111 opus/48000/2\r\n";
        assert!(!policy().apply(sdp).contains("b=AS"));
    }

    #[test]
    fn test_video_section_without_connection_line() {
        let sdp = "v=0\nm=video 9 RTP/AVP 96\na=rtpmap:96 H264/90000\n";
        assert_eq!(
            policy().apply(sdp),
            "v=0\nm=video 9 RTP/AVP 96\nb=AS:2500\nb=TIAS:2500000\na=rtpmap:96 H264/90000\n"
        );
    }

    #[test]
    fn test_validate() {
        assert!(validate(OFFER).is_ok());
        assert!(validate("").is_err());
        assert!(validate("garbage").is_err());
        assert!(matches!(
            validate("v=0\r\ns=-\r\n"),
            Err(PeerError::MalformedDescription(_))
        ));
    }
}
