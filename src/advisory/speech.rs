use super::rules::{action_hint, keyword};
use crate::hazards::HazardType;

pub const MAX_CHARS: usize = 70;
pub const MAX_WORDS: usize = 14;
const ELLIPSIS: &str = "...";

/// Fits spoken advisories into a character and word budget while keeping
/// the type's keyword audible.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SpeechBudget {
    pub max_chars: usize,
    pub max_words: usize,
}

impl Default for SpeechBudget {
    fn default() -> Self {
        Self {
            max_chars: MAX_CHARS,
            max_words: MAX_WORDS,
        }
    }
}

fn normalize(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

fn char_len(text: &str) -> usize {
    text.chars().count()
}

fn word_count(text: &str) -> usize {
    text.split_whitespace().count()
}

fn take_words(text: &str, n: usize) -> String {
    text.split_whitespace().take(n).collect::<Vec<_>>().join(" ")
}

fn take_chars(text: &str, n: usize) -> String {
    text.chars().take(n).collect()
}

/// "ahead" without a distance, "now" within 80 m, otherwise the distance
/// rounded up to the next 10 m.
pub fn distance_phrase(distance_m: Option<f64>) -> String {
    match distance_m {
        Some(d) if d.round() > 0.0 => {
            let d = d.round() as i64;
            if d <= 80 {
                "now".to_string()
            } else {
                format!("in {} meters", (d + 9) / 10 * 10)
            }
        }
        _ => "ahead".to_string(),
    }
}

fn compose(keyword: &str, distance: Option<&str>, hint: Option<&str>) -> String {
    let lead = match distance {
        Some(phrase) => format!("{keyword} {phrase}"),
        None => keyword.to_string(),
    };
    match hint {
        Some(hint) => format!("{lead}. {hint}"),
        None => format!("{lead}."),
    }
}

impl SpeechBudget {
    fn fits(&self, text: &str) -> bool {
        char_len(text) <= self.max_chars && word_count(text) <= self.max_words
    }

    fn terminate(&self, text: String) -> String {
        match text.chars().last() {
            None | Some('.' | '!' | '?') => text,
            Some(_) if char_len(&text) + 1 > self.max_chars => text,
            Some(_) => text + ".",
        }
    }

    fn hard_trim(&self, text: &str) -> String {
        let mut out = take_words(&normalize(text), self.max_words);
        if char_len(&out) > self.max_chars {
            let prefix = self.max_chars.saturating_sub(ELLIPSIS.len());
            let head = take_chars(&out, prefix).trim_end().to_string();
            out = if head.is_empty() {
                take_chars(ELLIPSIS, self.max_chars)
            } else {
                head + ELLIPSIS
            };
        }
        if word_count(&out) > self.max_words {
            out = take_words(&out, self.max_words);
        }
        if char_len(&out) > self.max_chars {
            out = take_chars(&out, self.max_chars).trim_end().to_string();
        }
        self.terminate(out)
    }

    /// Returns the first of `text` or progressively shorter compositions of
    /// keyword, distance and hint that contains the keyword and fits; hard
    /// trims as a last resort.
    pub fn enforce(&self, text: &str, hazard_type: HazardType, distance_m: Option<f64>) -> String {
        let keyword = keyword(hazard_type);
        let distance = distance_phrase(distance_m);
        let hint = action_hint(hazard_type);
        let wanted = keyword.to_lowercase();

        let candidates = [
            normalize(text),
            compose(keyword, Some(&distance), Some(hint)),
            compose(keyword, Some(&distance), None),
            compose(keyword, None, None),
        ];
        candidates
            .into_iter()
            .map(|c| normalize(&c))
            .find(|c| !c.is_empty() && c.to_lowercase().contains(&wanted) && self.fits(c))
            .map(|c| self.terminate(c))
            .unwrap_or_else(|| self.hard_trim(&compose(keyword, Some(&distance), Some(hint))))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_distance_phrases() {
        assert_eq!(distance_phrase(None), "ahead");
        assert_eq!(distance_phrase(Some(0.0)), "ahead");
        assert_eq!(distance_phrase(Some(80.0)), "now");
        assert_eq!(distance_phrase(Some(81.0)), "in 90 meters");
        assert_eq!(distance_phrase(Some(240.0)), "in 240 meters");
    }

    #[test]
    fn test_fitting_text_passes_through_with_punctuation() {
        let budget = SpeechBudget::default();
        assert_eq!(
            budget.enforce("  Roundabout   ahead. Prepare early ", HazardType::Roundabout, Some(200.0)),
            "Roundabout ahead. Prepare early."
        );
    }

    #[test]
    fn test_text_without_keyword_is_replaced() {
        let budget = SpeechBudget::default();
        assert_eq!(
            budget.enforce("Slow down please", HazardType::SchoolZone, Some(150.0)),
            "School zone in 150 meters. Slow down."
        );
    }

    #[test]
    fn test_long_text_falls_back_to_shorter_composition() {
        let budget = SpeechBudget::default();
        let long = "Zebra crossing coming up soon, so please keep a very careful eye out for \
                    anyone who might be stepping off the kerb";
        assert_eq!(
            budget.enforce(long, HazardType::ZebraCrossing, Some(40.0)),
            "Zebra crossing now. Watch for pedestrians."
        );
    }

    #[test]
    fn test_tight_budget_hard_trims() {
        let budget = SpeechBudget {
            max_chars: 12,
            max_words: 14,
        };
        let out = budget.enforce("", HazardType::MiniRoundabout, None);
        assert!(out.chars().count() <= 12, "{out}");
        assert!(out.ends_with("..."));
    }

    #[test]
    fn test_output_always_within_caps_and_keeps_keyword() {
        let budget = SpeechBudget::default();
        let inputs = [
            String::new(),
            "   ".to_string(),
            "word ".repeat(40),
            "x".repeat(200),
            "Traffic lights ahead, then a long rambling sentence that keeps going on and on".to_string(),
        ];
        for hazard_type in HazardType::ALL {
            for text in &inputs {
                for distance in [None, Some(10.0), Some(95.0), Some(12_345.0)] {
                    let out = budget.enforce(text, hazard_type, distance);
                    assert!(out.chars().count() <= MAX_CHARS, "{out}");
                    assert!(out.split_whitespace().count() <= MAX_WORDS, "{out}");
                    assert!(
                        out.to_lowercase().contains(&keyword(hazard_type).to_lowercase()),
                        "{out}"
                    );
                }
            }
        }
    }
}
