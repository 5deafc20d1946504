use serde::{Deserialize, Serialize};

/// UTC instant, serialized as epoch milliseconds to match what the
/// platform side writes.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub struct DateTime(pub chrono::DateTime<chrono::Utc>);

impl DateTime {
    pub fn now() -> Self {
        Self(chrono::Utc::now())
    }

    pub fn from_epoch_millis(millis: i64) -> Option<Self> {
        chrono::DateTime::<chrono::Utc>::from_timestamp_millis(millis).map(Self)
    }

    pub fn epoch_millis(&self) -> i64 {
        self.0.timestamp_millis()
    }
}

impl Serialize for DateTime {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_i64(self.epoch_millis())
    }
}

impl<'de> Deserialize<'de> for DateTime {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        use serde::de::Error;
        let millis = i64::deserialize(deserializer)?;
        Self::from_epoch_millis(millis)
            .ok_or(Error::custom("cannot deserialize DateTime from millis"))
    }
}

/// Last known send state of a participant's audio and video.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct MediaFlags {
    pub audio: bool,
    pub video: bool,
}

impl Default for MediaFlags {
    fn default() -> Self {
        Self {
            audio: true,
            video: true,
        }
    }
}
