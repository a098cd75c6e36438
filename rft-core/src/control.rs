//! Control-channel message shapes, exchanged as JSON datagrams ahead of the
//! data transfer itself.

use serde::{Deserialize, Serialize};

use crate::congestion::{CongestionController, Reno, Vegas};
use crate::sender::ArqMode;

pub const DEFAULT_PKT_SIZE: usize = 1024;
pub const DEFAULT_MAX_WIN: usize = 64;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum CcMode {
    Reno,
    Vegas,
}

impl CcMode {
    pub fn build(self) -> Box<dyn CongestionController> {
        match self {
            CcMode::Reno => Box::new(Reno::new()),
            CcMode::Vegas => Box::new(Vegas::new()),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Request {
    /// Begins with `"upload "` or `"download "`.
    pub cmd: String,
    pub arq: ArqMode,
    pub cc: CcMode,
    #[serde(rename = "remoteName")]
    pub remote_name: String,
    #[serde(rename = "pktSize", default = "default_pkt_size")]
    pub pkt_size: usize,
    #[serde(rename = "maxWin", default = "default_max_win")]
    pub max_win: usize,
}

fn default_pkt_size() -> usize {
    DEFAULT_PKT_SIZE
}

fn default_max_win() -> usize {
    DEFAULT_MAX_WIN
}

impl Request {
    pub fn is_upload(&self) -> bool {
        self.cmd.starts_with("upload")
    }

    pub fn is_download(&self) -> bool {
        self.cmd.starts_with("download")
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "lowercase")]
pub enum Response {
    Ok {
        #[serde(rename = "dataPort")]
        data_port: u16,
    },
    Done {
        md5: String,
    },
    Error {
        why: String,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn request_round_trips_through_json() {
        let req = Request {
            cmd: "upload foo.bin".into(),
            arq: ArqMode::Gbn,
            cc: CcMode::Reno,
            remote_name: "foo.bin".into(),
            pkt_size: 1024,
            max_win: 64,
        };
        let json = serde_json::to_string(&req).unwrap();
        let back: Request = serde_json::from_str(&json).unwrap();
        assert_eq!(back.remote_name, "foo.bin");
        assert!(back.is_upload());
    }

    #[test]
    fn request_applies_defaults_when_absent() {
        let json = r#"{"cmd":"download foo","arq":"sr","cc":"vegas","remoteName":"foo"}"#;
        let req: Request = serde_json::from_str(json).unwrap();
        assert_eq!(req.pkt_size, DEFAULT_PKT_SIZE);
        assert_eq!(req.max_win, DEFAULT_MAX_WIN);
        assert!(req.is_download());
    }

    #[test]
    fn ok_response_serializes_with_status_tag() {
        let resp = Response::Ok { data_port: 41000 };
        let json = serde_json::to_string(&resp).unwrap();
        assert!(json.contains("\"status\":\"ok\""));
        assert!(json.contains("\"dataPort\":41000"));
    }

    #[test]
    fn error_response_serializes_why() {
        let resp = Response::Error {
            why: "file not exist".into(),
        };
        let json = serde_json::to_string(&resp).unwrap();
        assert!(json.contains("\"why\":\"file not exist\""));
    }
}
