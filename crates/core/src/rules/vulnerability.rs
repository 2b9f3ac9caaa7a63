use crate::domain::client::Vulnerability;

const KEYWORDS: [(&str, &str, f64); 6] = [
    ("bereavement", "Life Event", 0.4),
    ("divorce", "Life Event", 0.3),
    ("redundancy", "Financial Resilience", 0.5),
    ("health issue", "Health", 0.4),
    ("long covid", "Health", 0.3),
    ("dementia", "Health", 0.7),
];

const LOW_LIQUIDITY_WEALTH: f64 = 10_000.0;
const LOW_LIQUIDITY_BONUS: f64 = 0.2;

/// Scores a client 0.0..=1.0 from recent memory text and total wealth.
pub fn assess<S: AsRef<str>>(memories: &[S], total_wealth: f64) -> Vulnerability {
    let text = memories
        .iter()
        .map(|m| m.as_ref())
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase();

    let mut score = 0.0;
    let mut categories: Vec<&str> = Vec::new();
    let mut notes: Vec<String> = Vec::new();

    for (keyword, category, weight) in KEYWORDS {
        if text.contains(keyword) {
            score += weight;
            if !categories.contains(&category) {
                categories.push(category);
            }
            notes.push(format!("Detected mention of {keyword}"));
        }
    }

    if total_wealth < LOW_LIQUIDITY_WEALTH {
        score += LOW_LIQUIDITY_BONUS;
        if !categories.contains(&"Resilience") {
            categories.push("Resilience");
        }
    }

    let defaults = Vulnerability::default();
    Vulnerability {
        score: score.min(1.0),
        category: if categories.is_empty() {
            defaults.category
        } else {
            categories.join(", ")
        },
        notes: if notes.is_empty() {
            defaults.notes
        } else {
            notes.join("; ")
        },
    }
}
