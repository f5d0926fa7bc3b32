use parley_core::config::SlackConfig;

/// Header telling Slack not to redeliver the event.
pub const NO_RETRY_HEADER: &str = "x-slack-no-retry";

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RetryNotice {
    pub attempt: String,
    pub reason: String,
}

/// Detects Slack redeliveries that should be acknowledged and dropped.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RetryFilter {
    reason_header: String,
    number_header: String,
    ignored_reasons: Vec<String>,
}

impl RetryFilter {
    pub fn new(
        reason_header: impl Into<String>,
        number_header: impl Into<String>,
        ignored_reasons: Vec<String>,
    ) -> Self {
        Self {
            reason_header: reason_header.into().to_ascii_lowercase(),
            number_header: number_header.into().to_ascii_lowercase(),
            ignored_reasons,
        }
    }

    pub fn from_config(config: &SlackConfig) -> Self {
        Self::new(
            config.slack_retry_reason_header.as_str(),
            config.slack_retry_number_header.as_str(),
            config.errors_ignore_retry.clone(),
        )
    }

    pub fn reason_header(&self) -> &str {
        &self.reason_header
    }

    pub fn number_header(&self) -> &str {
        &self.number_header
    }

    /// Returns a notice when the request is a retry whose reason is on the ignore list.
    ///
    /// `header` looks up an inbound header value by lowercase name.
    pub fn inspect<'a, F>(&self, header: F) -> Option<RetryNotice>
    where
        F: Fn(&str) -> Option<&'a str>,
    {
        let attempt = header(&self.number_header).map(str::trim).filter(|value| !value.is_empty())?;
        let reason = header(&self.reason_header).map(str::trim).unwrap_or_default();

        self.ignored_reasons.iter().any(|ignored| ignored == reason).then(|| RetryNotice {
            attempt: attempt.to_owned(),
            reason: reason.to_owned(),
        })
    }
}
