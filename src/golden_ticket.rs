//! Golden Ticket Engine.
//!
//! Static template catalog, CSPRNG-gated injection, three-tolerance verification.
//! Ported from the original `GoldenTicketGenerator`/`GOLDEN_TICKET_TEMPLATES`
//! (`golden_ticket.py`) with the module-global singleton left behind in favor of an
//! explicit handle.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{SystemTime, UNIX_EPOCH};

use rand::rngs::OsRng;
use rand::Rng;
use serde::Serialize;
use tracing::info;
use uuid::Uuid;

use crate::reputation::ReputationLedger;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Tolerance {
    Exact,
    Contains,
    Numeric,
}

struct Template {
    prompt: &'static str,
    expected: &'static str,
    tolerance: Tolerance,
}

/// Ported verbatim from the original `GOLDEN_TICKET_TEMPLATES` catalog — the
/// only source of concrete wording for these probes.
const TEMPLATES: &[Template] = &[
    Template { prompt: "What is 2+2?", expected: "4", tolerance: Tolerance::Exact },
    Template { prompt: "Calculate 15 * 7", expected: "105", tolerance: Tolerance::Exact },
    Template { prompt: "What is the square root of 144?", expected: "12", tolerance: Tolerance::Exact },
    Template { prompt: "What is 100 divided by 4?", expected: "25", tolerance: Tolerance::Exact },
    Template { prompt: "Calculate 17 + 28", expected: "45", tolerance: Tolerance::Exact },
    Template { prompt: "What is 9 squared?", expected: "81", tolerance: Tolerance::Exact },
    Template { prompt: "What is the sum of 123 and 456?", expected: "579", tolerance: Tolerance::Exact },
    Template { prompt: "Calculate 50% of 200", expected: "100", tolerance: Tolerance::Exact },
    Template {
        prompt: "What is the third word in \"The quick brown fox\"?",
        expected: "brown",
        tolerance: Tolerance::Exact,
    },
    Template { prompt: "Spell 'hello' backwards", expected: "olleh", tolerance: Tolerance::Exact },
    Template {
        prompt: "How many letters are in the word 'javascript'?",
        expected: "10",
        tolerance: Tolerance::Exact,
    },
    Template {
        prompt: "What letter comes after \"b\" in the alphabet?",
        expected: "c",
        tolerance: Tolerance::Exact,
    },
    Template { prompt: "Capitalize the word 'test'", expected: "TEST", tolerance: Tolerance::Exact },
    Template { prompt: "What is the capital of France?", expected: "Paris", tolerance: Tolerance::Contains },
    Template { prompt: "How many days are in a week?", expected: "7", tolerance: Tolerance::Exact },
    Template { prompt: "What planet is known as the Red Planet?", expected: "Mars", tolerance: Tolerance::Contains },
    Template {
        prompt: "How many continents are there on Earth?",
        expected: "7",
        tolerance: Tolerance::Exact,
    },
    Template {
        prompt: "What is the freezing point of water in Celsius?",
        expected: "0",
        tolerance: Tolerance::Contains,
    },
    Template { prompt: "How many sides does a triangle have?", expected: "3", tolerance: Tolerance::Exact },
    Template { prompt: "What color is the sky on a clear day?", expected: "blue", tolerance: Tolerance::Contains },
    Template { prompt: "How many hours are in a day?", expected: "24", tolerance: Tolerance::Exact },
    Template { prompt: "What is the opposite of 'hot'?", expected: "cold", tolerance: Tolerance::Contains },
    Template { prompt: "How many minutes are in an hour?", expected: "60", tolerance: Tolerance::Exact },
];

#[derive(Debug, Clone, Serialize)]
pub struct GoldenTicket {
    pub request_id: String,
    pub prompt: String,
    pub expected_answer: String,
    pub tolerance: Tolerance,
}

/// Result of offering a broadcast opportunity to the injector.
pub enum BroadcastContext {
    /// No ticket injected; broadcast the caller's own context unchanged.
    Normal(String),
    /// A ticket was injected; broadcast its prompt instead.
    Ticket(GoldenTicket),
}

pub const DEFAULT_INJECTION_RATE: f64 = 0.05;

pub struct GoldenTicketEngineConfig {
    pub injection_rate: f64,
    pub reputation_threshold: f64,
    pub min_attempts_before_ban: u32,
    pub ban_duration_hours: f64,
}

impl Default for GoldenTicketEngineConfig {
    fn default() -> Self {
        Self {
            injection_rate: DEFAULT_INJECTION_RATE,
            reputation_threshold: crate::reputation::DEFAULT_REPUTATION_THRESHOLD,
            min_attempts_before_ban: crate::reputation::DEFAULT_MIN_ATTEMPTS_BEFORE_BAN,
            ban_duration_hours: crate::reputation::DEFAULT_BAN_DURATION_HOURS,
        }
    }
}

pub struct GoldenTicketEngine {
    config: GoldenTicketEngineConfig,
    active: Mutex<HashMap<String, GoldenTicket>>,
}

impl GoldenTicketEngine {
    pub fn new(config: GoldenTicketEngineConfig) -> Self {
        Self {
            config: GoldenTicketEngineConfig {
                injection_rate: config.injection_rate.clamp(0.0, 1.0),
                ..config
            },
            active: Mutex::new(HashMap::new()),
        }
    }

    /// Draws from a CSPRNG; with probability `injection_rate` replaces the caller's
    /// context with a randomly chosen template and registers it under `request_id`.
    pub fn maybe_inject(&self, request_id: &str, normal_context: String) -> BroadcastContext {
        let roll: f64 = OsRng.gen();
        if roll >= self.config.injection_rate {
            return BroadcastContext::Normal(normal_context);
        }

        let idx = OsRng.gen_range(0..TEMPLATES.len());
        let tpl = &TEMPLATES[idx];
        let ticket = GoldenTicket {
            request_id: request_id.to_string(),
            prompt: tpl.prompt.to_string(),
            expected_answer: tpl.expected.to_string(),
            tolerance: tpl.tolerance,
        };

        self.active
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .insert(request_id.to_string(), ticket.clone());

        BroadcastContext::Ticket(ticket)
    }

    /// Verifies a scout's response against the ticket registered for `request_id`.
    /// Unknown ids return `None` ("not a ticket" — not an error). Removes the
    /// ticket on first verification attempt and mutates `ledger` with the verdict.
    pub fn verify(
        &self,
        request_id: &str,
        scout_id: &str,
        scout_response: &str,
        ledger: &ReputationLedger,
    ) -> Option<bool> {
        let ticket = self
            .active
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .remove(request_id)?;

        let correct = check_answer(scout_response, &ticket.expected_answer, ticket.tolerance);

        let (_, ban) = ledger.upsert(
            scout_id,
            correct,
            self.config.reputation_threshold,
            self.config.min_attempts_before_ban,
            self.config.ban_duration_hours,
        );
        if ban.is_some() {
            info!("golden ticket failure banned scout {scout_id}");
        }

        Some(correct)
    }

    /// Purges stale in-flight tickets lazily, on the next sweep, rather than
    /// racing a hard TTL against tickets themselves.
    pub fn sweep_abandoned(&self, request_ids_still_live: &[String]) {
        let mut active = self.active.lock().unwrap_or_else(|p| p.into_inner());
        active.retain(|id, _| request_ids_still_live.iter().any(|live| live == id));
    }
}

/// `exact`: case-insensitive full-string equality after trimming.
/// `contains`: case-insensitive substring.
/// `numeric`: extracted from the *raw* (untrimmed, original-case) strings, not the
/// lowercased copies used above — accept iff any number in `response` is within
/// 0.01 of the first number extracted from `expected`; fall back to exact iff no
/// number extracts from `expected`. This nuance comes from the original
/// `_check_answer` implementation.
fn check_answer(response: &str, expected: &str, tolerance: Tolerance) -> bool {
    let response_clean = response.trim().to_lowercase();
    let expected_clean = expected.trim().to_lowercase();

    match tolerance {
        Tolerance::Exact => response_clean == expected_clean,
        Tolerance::Contains => response_clean.contains(&expected_clean),
        Tolerance::Numeric => {
            let expected_nums = extract_numbers(expected);
            let Some(expected_val) = expected_nums.first() else {
                return response_clean == expected_clean;
            };
            extract_numbers(response)
                .iter()
                .any(|n| (n - expected_val).abs() < 0.01)
        }
    }
}

fn extract_numbers(text: &str) -> Vec<f64> {
    let mut numbers = Vec::new();
    let bytes = text.as_bytes();
    let mut i = 0;
    while i < bytes.len() {
        let start = i;
        let mut j = i;
        if bytes[j] == b'-' {
            j += 1;
        }
        let digits_start = j;
        while j < bytes.len() && bytes[j].is_ascii_digit() {
            j += 1;
        }
        if j > digits_start {
            if j < bytes.len() && bytes[j] == b'.' {
                let mut k = j + 1;
                while k < bytes.len() && bytes[k].is_ascii_digit() {
                    k += 1;
                }
                if k > j + 1 {
                    j = k;
                }
            }
            if let Ok(n) = text[start..j].parse::<f64>() {
                numbers.push(n);
            }
            i = j;
        } else {
            i += 1;
        }
    }
    numbers
}

pub fn new_request_id() -> String {
    format!("gt_{}", Uuid::new_v4().simple())
}

pub fn now_secs() -> f64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs_f64()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exact_tolerance_is_case_and_whitespace_insensitive() {
        assert!(check_answer(" 4 ", "4", Tolerance::Exact));
        assert!(check_answer("PARIS", "paris", Tolerance::Exact));
        assert!(!check_answer("5", "4", Tolerance::Exact));
    }

    #[test]
    fn contains_tolerance_checks_substring() {
        assert!(check_answer(
            "I believe Paris is the capital of France.",
            "Paris",
            Tolerance::Contains
        ));
        assert!(!check_answer("Berlin", "Paris", Tolerance::Contains));
    }

    #[test]
    fn numeric_tolerance_accepts_within_epsilon() {
        assert!(check_answer("about 25.004 or so", "25", Tolerance::Numeric));
        assert!(!check_answer("about 26", "25", Tolerance::Numeric));
    }

    #[test]
    fn numeric_tolerance_falls_back_to_exact_when_expected_has_no_number() {
        assert!(check_answer("brown", "brown", Tolerance::Numeric));
        assert!(!check_answer("blue", "brown", Tolerance::Numeric));
    }

    #[test]
    fn unknown_ticket_id_is_not_an_error() {
        let engine = GoldenTicketEngine::new(GoldenTicketEngineConfig::default());
        let ledger = ReputationLedger::open_in_memory().unwrap();
        assert_eq!(engine.verify("nonexistent", "scout-1", "anything", &ledger), None);
    }

    #[test]
    fn honest_scout_across_many_tickets_is_never_banned() {
        let engine = GoldenTicketEngine::new(GoldenTicketEngineConfig {
            injection_rate: 1.0,
            ..GoldenTicketEngineConfig::default()
        });
        let ledger = ReputationLedger::open_in_memory().unwrap();
        for i in 0..10 {
            let request_id = format!("req-{i}");
            let ctx = engine.maybe_inject(&request_id, "ignored".to_string());
            let BroadcastContext::Ticket(ticket) = ctx else {
                panic!("injection_rate=1.0 should always inject");
            };
            let verdict = engine.verify(&request_id, "honest-scout", &ticket.expected_answer, &ledger);
            assert_eq!(verdict, Some(true));
        }
        assert!(!ledger.is_banned("honest-scout"));
    }

    #[test]
    fn dishonest_scout_is_banned_after_min_attempts() {
        let engine = GoldenTicketEngine::new(GoldenTicketEngineConfig {
            injection_rate: 1.0,
            ..GoldenTicketEngineConfig::default()
        });
        let ledger = ReputationLedger::open_in_memory().unwrap();
        for i in 0..3 {
            let request_id = format!("req-{i}");
            let ctx = engine.maybe_inject(&request_id, "ignored".to_string());
            let BroadcastContext::Ticket(_) = ctx else {
                panic!("injection_rate=1.0 should always inject");
            };
            engine.verify(&request_id, "dishonest-scout", "definitely wrong", &ledger);
        }
        assert!(ledger.is_banned("dishonest-scout"));
    }
}
