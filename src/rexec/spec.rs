//! Job and event payload encoding.
//!
//! Both are JSON with PascalCase fields. `Script` is base64 and `Wait` is an
//! integer count of nanoseconds, so a node can decode the job without any
//! side information.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// What a node should run, plus the quiet period between heartbeats.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct JobSpec {
    #[serde(default, skip_serializing_if = "String::is_empty")]
    command: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    args: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty", with = "base64_bytes")]
    script: Vec<u8>,
    #[serde(with = "nanos")]
    wait: Duration,
}

/// The runnable part of a job, exactly one form per spec.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobBody<'a> {
    /// Script body; written to a file and run by the shell.
    Script(&'a [u8]),
    /// Argument vector executed without a shell.
    Argv(&'a [String]),
    /// Command line run by the shell.
    Command(&'a str),
}

impl JobSpec {
    pub fn command(command: impl Into<String>, wait: Duration) -> Self {
        Self {
            command: command.into(),
            args: Vec::new(),
            script: Vec::new(),
            wait,
        }
    }

    pub fn argv(args: Vec<String>, wait: Duration) -> Self {
        Self {
            command: String::new(),
            args,
            script: Vec::new(),
            wait,
        }
    }

    pub fn script(script: Vec<u8>, wait: Duration) -> Self {
        Self {
            command: String::new(),
            args: Vec::new(),
            script,
            wait,
        }
    }

    /// Script wins over argv, argv over a command line.
    pub fn body(&self) -> JobBody<'_> {
        if !self.script.is_empty() {
            JobBody::Script(&self.script)
        } else if !self.args.is_empty() {
            JobBody::Argv(&self.args)
        } else {
            JobBody::Command(&self.command)
        }
    }

    pub fn wait(&self) -> Duration {
        self.wait
    }

    pub fn encode(&self) -> Result<Vec<u8>, serde_json::Error> {
        serde_json::to_vec(self)
    }

    pub fn decode(raw: &[u8]) -> Result<Self, serde_json::Error> {
        serde_json::from_slice(raw)
    }
}

/// Payload of the `_rexec` user event: where to find the job.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct ExecEvent {
    pub prefix: String,
    pub session: String,
}

impl ExecEvent {
    pub fn encode(&self) -> Result<Vec<u8>, serde_json::Error> {
        serde_json::to_vec(self)
    }

    pub fn decode(raw: &[u8]) -> Result<Self, serde_json::Error> {
        serde_json::from_slice(raw)
    }
}

mod base64_bytes {
    use base64::prelude::*;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8], ser: S) -> Result<S::Ok, S::Error> {
        ser.serialize_str(&BASE64_STANDARD.encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(de: D) -> Result<Vec<u8>, D::Error> {
        match Option::<String>::deserialize(de)? {
            Some(s) => BASE64_STANDARD
                .decode(s.as_bytes())
                .map_err(serde::de::Error::custom),
            None => Ok(Vec::new()),
        }
    }
}

mod nanos {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(d: &Duration, ser: S) -> Result<S::Ok, S::Error> {
        ser.serialize_u64(u64::try_from(d.as_nanos()).unwrap_or(u64::MAX))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(de: D) -> Result<Duration, D::Error> {
        // Signed on the wire; a negative wait means no wait.
        let n = i64::deserialize(de)?;
        Ok(Duration::from_nanos(n.max(0) as u64))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn command_wire_format() {
        let spec = JobSpec::command("uptime", Duration::from_secs(1));
        let raw = spec.encode().unwrap();
        assert_eq!(
            std::str::from_utf8(&raw).unwrap(),
            r#"{"Command":"uptime","Wait":1000000000}"#
        );
    }

    #[test]
    fn script_is_base64_and_takes_precedence() {
        let spec = JobSpec::script(b"echo hi\n".to_vec(), Duration::from_millis(500));
        let v: serde_json::Value = serde_json::from_slice(&spec.encode().unwrap()).unwrap();
        assert_eq!(v["Script"], "ZWNobyBoaQo=");
        assert!(v.get("Command").is_none());

        let decoded = JobSpec::decode(
            br#"{"Command":"ignored","Script":"ZWNobyBoaQo=","Wait":500000000}"#,
        )
        .unwrap();
        assert_eq!(decoded.body(), JobBody::Script(b"echo hi\n"));
        assert_eq!(decoded.wait(), Duration::from_millis(500));
    }

    #[test]
    fn argv_body() {
        let spec = JobSpec::argv(vec!["ls".into(), "-l".into()], Duration::ZERO);
        let back = JobSpec::decode(&spec.encode().unwrap()).unwrap();
        match back.body() {
            JobBody::Argv(args) => assert_eq!(args, ["ls", "-l"]),
            other => panic!("unexpected body {other:?}"),
        }
    }

    #[test]
    fn null_script_and_negative_wait() {
        let spec = JobSpec::decode(br#"{"Command":"id","Script":null,"Wait":-5}"#).unwrap();
        assert_eq!(spec.body(), JobBody::Command("id"));
        assert_eq!(spec.wait(), Duration::ZERO);
    }

    #[test]
    fn event_wire_format() {
        let ev = ExecEvent {
            prefix: "_rexec".into(),
            session: "s1".into(),
        };
        assert_eq!(
            ev.encode().unwrap(),
            br#"{"Prefix":"_rexec","Session":"s1"}"#.to_vec()
        );
    }
}
