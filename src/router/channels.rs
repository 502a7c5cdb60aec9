/// Bus channel naming scheme, everything under one namespace.
///
/// Requests ride `{ns}:request:{kind}`, responses come back on the two
/// fixed channels, and live updates use one channel per topic so
/// subscribers get per-entity granularity instead of a firehose.
#[derive(Debug, Clone)]
pub struct Channels {
    namespace: String,
}

impl Channels {
    pub fn new(namespace: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
        }
    }

    /// Channel a request of `kind` is published on.
    pub fn request(&self, kind: &str) -> String {
        format!("{}:request:{}", self.namespace, kind)
    }

    /// Fixed channel for successful worker responses.
    pub fn success(&self) -> String {
        format!("{}:success-response", self.namespace)
    }

    /// Fixed channel for worker business errors.
    pub fn error(&self) -> String {
        format!("{}:error-response", self.namespace)
    }

    /// Channel carrying pushes for one topic.
    pub fn topic(&self, topic: &str) -> String {
        format!("{}:topic:{}", self.namespace, topic)
    }

    /// Pattern matching every topic channel in the namespace.
    pub fn topic_pattern(&self) -> String {
        format!("{}:topic:*", self.namespace)
    }

    /// Recover the topic from a channel name, if it is a topic channel.
    pub fn topic_from_channel<'a>(&self, channel: &'a str) -> Option<&'a str> {
        channel
            .strip_prefix(self.namespace.as_str())?
            .strip_prefix(":topic:")
    }
}
