//! Terminal marker recognition for guest output.
//!
//! Besides the exact `PASS`/`FAIL` lines, the Swink kernel test runner has
//! its own summary lines:
//!
//! ```text
//! [runner] Run complete: 3/3 passed
//! [runner] ** ALL TESTS PASSED **
//! ```
//!
//! and a kernel panic prints a banner before spinning the core forever, so
//! waiting for the timeout would only waste time.

use regex::Regex;

use crate::config::MarkerConfig;
use crate::error::HostError;

pub const ALL_PASSED_BANNER: &str = "[runner] ** ALL TESTS PASSED **";
pub const PANIC_BANNER: &str = "****************PANIC****************";
const RUN_COMPLETE_PREFIX: &str = "[runner] Run complete: ";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Verdict {
    Pass,
    Fail(String),
}

#[derive(Debug, Clone)]
pub struct Markers {
    pass: Vec<String>,
    fail: Vec<String>,
    expect: Option<Regex>,
    runner_protocol: bool,
}

impl Markers {
    /// Markers are compared in the same normalized form as guest lines.
    pub fn new(config: &MarkerConfig) -> Result<Self, HostError> {
        let expect = config
            .expect
            .as_deref()
            .map(expect_pattern)
            .transpose()?;

        Ok(Self {
            pass: normalize_all(&config.pass),
            fail: normalize_all(&config.fail),
            expect,
            runner_protocol: config.runner_protocol,
        })
    }

    /// Classify one line of guest output. `None` means keep reading.
    pub fn classify(&self, line: &str) -> Option<Verdict> {
        let line = normalize(line);
        if line.is_empty() {
            return None;
        }

        if self.fail.iter().any(|m| m == line) {
            return Some(Verdict::Fail(format!("fail marker {line:?}")));
        }
        if self.pass.iter().any(|m| m == line) {
            return Some(Verdict::Pass);
        }
        if self.expect.as_ref().is_some_and(|re| re.is_match(line)) {
            return Some(Verdict::Pass);
        }

        if self.runner_protocol {
            return classify_runner(line);
        }
        None
    }
}

impl Default for Markers {
    fn default() -> Self {
        let config = MarkerConfig::default();
        Self {
            pass: normalize_all(&config.pass),
            fail: normalize_all(&config.fail),
            expect: None,
            runner_protocol: config.runner_protocol,
        }
    }
}

pub fn expect_pattern(pattern: &str) -> Result<Regex, HostError> {
    Regex::new(pattern)
        .map_err(|e| HostError::InvalidArgument(format!("bad expect pattern: {e}")))
}

fn normalize_all(markers: &[String]) -> Vec<String> {
    markers.iter().map(|m| normalize(m).to_string()).collect()
}

/// Strip whitespace and the `\r` the firmware UART sends after every `\n`.
pub fn normalize(line: &str) -> &str {
    line.trim_matches(|c: char| c == '\r' || c.is_whitespace())
}

fn classify_runner(line: &str) -> Option<Verdict> {
    if line == ALL_PASSED_BANNER {
        return Some(Verdict::Pass);
    }
    if line.contains(PANIC_BANNER) {
        return Some(Verdict::Fail("kernel panic".to_string()));
    }

    let tally = line.strip_prefix(RUN_COMPLETE_PREFIX)?;
    let (passed, total) = parse_tally(tally)?;
    if passed < total {
        Some(Verdict::Fail(format!("{passed}/{total} tests passed")))
    } else {
        // the all-passed banner follows
        None
    }
}

fn parse_tally(s: &str) -> Option<(u64, u64)> {
    let s = s.strip_suffix(" passed")?;
    let (passed, total) = s.split_once('/')?;
    Some((passed.trim().parse().ok()?, total.trim().parse().ok()?))
}
