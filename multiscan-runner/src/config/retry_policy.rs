// Copyright (c) The multiscan Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

use serde::Deserialize;
use std::{fmt, time::Duration};

/// Type for the `try-count` config key.
///
/// `count` is the maximum number of tries per batch, including the first one: a count of 1 means
/// batches are never retried.
#[derive(Debug, Copy, Clone, Deserialize, PartialEq, Eq)]
#[serde(tag = "backoff", rename_all = "kebab-case", deny_unknown_fields)]
pub enum RetryPolicy {
    /// Fixed backoff.
    #[serde(rename_all = "kebab-case")]
    Fixed {
        /// Maximum try count.
        count: usize,

        /// Delay between tries.
        #[serde(default, with = "humantime_serde")]
        delay: Duration,
    },

    /// Exponential backoff.
    #[serde(rename_all = "kebab-case")]
    Exponential {
        /// Maximum try count.
        count: usize,

        /// Delay before the first retry. Not optional for exponential backoff.
        #[serde(with = "humantime_serde")]
        delay: Duration,

        /// If set, limits the delay between tries.
        #[serde(default, with = "humantime_serde")]
        max_delay: Option<Duration>,
    },
}

impl Default for RetryPolicy {
    #[inline]
    fn default() -> Self {
        Self::new_without_delay(1)
    }
}

impl RetryPolicy {
    /// Creates a new policy with no delay between tries.
    pub fn new_without_delay(count: usize) -> Self {
        Self::Fixed {
            count,
            delay: Duration::ZERO,
        }
    }

    /// Returns the maximum number of tries.
    pub fn count(&self) -> usize {
        match self {
            Self::Fixed { count, .. } | Self::Exponential { count, .. } => *count,
        }
    }

    /// Returns an iterator over the delays to wait before each retry.
    pub fn delays(&self) -> RetryDelays {
        RetryDelays::new(*self)
    }
}

/// The delays to wait before each retry, as computed from a [`RetryPolicy`].
///
/// Yields one fewer item than the policy's count, since the first try is never delayed.
#[derive(Clone, Debug)]
pub struct RetryDelays {
    policy: RetryPolicy,
    current_factor: f64,
    remaining: usize,
}

impl RetryDelays {
    const BACKOFF_EXPONENT: f64 = 2.;

    fn new(policy: RetryPolicy) -> Self {
        Self {
            policy,
            current_factor: 1.,
            remaining: policy.count().saturating_sub(1),
        }
    }

    fn next_delay(&mut self) -> Duration {
        match self.policy {
            RetryPolicy::Fixed { delay, .. } => delay,
            RetryPolicy::Exponential {
                delay, max_delay, ..
            } => {
                let exp_delay = delay.mul_f64(self.current_factor);

                // Stop multiplying the exponential factor once delay passes max_delay.
                if let Some(max_delay) = max_delay
                    && exp_delay > max_delay
                {
                    return max_delay;
                }

                self.current_factor *= Self::BACKOFF_EXPONENT;
                exp_delay
            }
        }
    }
}

impl Iterator for RetryDelays {
    type Item = Duration;

    fn next(&mut self) -> Option<Self::Item> {
        if self.remaining > 0 {
            self.remaining -= 1;
            Some(self.next_delay())
        } else {
            None
        }
    }
}

pub(in crate::config) fn deserialize_retry_policy<'de, D>(
    deserializer: D,
) -> Result<RetryPolicy, D::Error>
where
    D: serde::Deserializer<'de>,
{
    struct V;

    impl<'de2> serde::de::Visitor<'de2> for V {
        type Value = RetryPolicy;

        fn expecting(&self, formatter: &mut fmt::Formatter) -> fmt::Result {
            write!(
                formatter,
                "a table ({{ count = 3, backoff = \"exponential\", delay = \"1s\", max-delay = \"10s\" }}) or a number (3)"
            )
        }

        // Note that TOML uses i64, not u64.
        fn visit_i64<E>(self, v: i64) -> Result<Self::Value, E>
        where
            E: serde::de::Error,
        {
            let count = usize::try_from(v).map_err(|_| {
                serde::de::Error::invalid_value(serde::de::Unexpected::Signed(v), &self)
            })?;
            Ok(RetryPolicy::new_without_delay(count))
        }

        fn visit_u64<E>(self, v: u64) -> Result<Self::Value, E>
        where
            E: serde::de::Error,
        {
            let count = usize::try_from(v).map_err(|_| {
                serde::de::Error::invalid_value(serde::de::Unexpected::Unsigned(v), &self)
            })?;
            Ok(RetryPolicy::new_without_delay(count))
        }

        fn visit_map<A>(self, map: A) -> Result<Self::Value, A::Error>
        where
            A: serde::de::MapAccess<'de2>,
        {
            RetryPolicy::deserialize(serde::de::value::MapAccessDeserializer::new(map))
        }
    }

    // Post-deserialize validation of retry policy.
    let retry_policy = deserializer.deserialize_any(V)?;
    if retry_policy.count() == 0 {
        return Err(serde::de::Error::custom("`count` must be at least 1"));
    }
    if let RetryPolicy::Exponential {
        delay, max_delay, ..
    } = retry_policy
    {
        if delay.is_zero() {
            return Err(serde::de::Error::custom(
                "`delay` cannot be zero with exponential backoff",
            ));
        }
        if max_delay.is_some_and(|max_delay| max_delay < delay) {
            return Err(serde::de::Error::custom(
                "`max-delay` cannot be less than delay with exponential backoff",
            ));
        }
    }

    Ok(retry_policy)
}
