pub mod client;
pub mod event;
pub mod market;
pub mod portfolio;
pub mod records;

/// Formats a sterling amount with thousands separators and no pence, e.g. `£12,500`.
pub fn gbp(amount: f64) -> String {
    let rounded = amount.round();
    let negative = rounded < 0.0;
    let digits = format!("{:.0}", rounded.abs());

    let mut grouped = String::with_capacity(digits.len() + digits.len() / 3);
    for (idx, ch) in digits.chars().enumerate() {
        if idx != 0 && (digits.len() - idx) % 3 == 0 {
            grouped.push(',');
        }
        grouped.push(ch);
    }

    if negative {
        format!("-£{grouped}")
    } else {
        format!("£{grouped}")
    }
}

/// Signed percentage with one decimal, e.g. `-6.5%` / `+1.2%`.
pub fn signed_pct(fraction: f64) -> String {
    format!("{:+.1}%", fraction * 100.0)
}
