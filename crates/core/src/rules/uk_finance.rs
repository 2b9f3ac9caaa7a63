//! UK allowance arithmetic used by the tax rules. Tax year 2024/25 figures.

pub const STANDARD_PENSION_ALLOWANCE: f64 = 60_000.0;
pub const MIN_PENSION_ALLOWANCE: f64 = 10_000.0;
pub const PENSION_TAPER_THRESHOLD: f64 = 260_000.0;
/// Below this gross income the taper is not evaluated at all.
pub const PENSION_CHECK_INCOME: f64 = 200_000.0;

pub const ISA_REMAINING_TRIGGER: f64 = 5_000.0;
pub const ISA_CASH_TRIGGER: f64 = 10_000.0;

pub const CGT_ANNUAL_EXEMPT_AMOUNT: f64 = 3_000.0;
pub const CGT_WARNING_FRACTION: f64 = 0.8;

/// Tapered annual allowance: £1 lost per £2 of income over the threshold, floored.
pub fn pension_annual_allowance(gross_income: f64) -> f64 {
    if gross_income <= PENSION_TAPER_THRESHOLD {
        return STANDARD_PENSION_ALLOWANCE;
    }
    let reduction = (gross_income - PENSION_TAPER_THRESHOLD) / 2.0;
    (STANDARD_PENSION_ALLOWANCE - reduction).max(MIN_PENSION_ALLOWANCE)
}

pub fn isa_opportunity(isa_remaining: f64, cash_balance: f64) -> bool {
    isa_remaining > ISA_REMAINING_TRIGGER && cash_balance > ISA_CASH_TRIGGER
}

pub fn cgt_exposure(unrealized_gains: f64) -> bool {
    unrealized_gains > CGT_ANNUAL_EXEMPT_AMOUNT * CGT_WARNING_FRACTION
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pension_allowance_tapers_and_floors() {
        assert_eq!(pension_annual_allowance(150_000.0), 60_000.0);
        assert_eq!(pension_annual_allowance(260_000.0), 60_000.0);
        assert_eq!(pension_annual_allowance(300_000.0), 40_000.0);
        assert_eq!(pension_annual_allowance(360_000.0), 10_000.0);
        assert_eq!(pension_annual_allowance(1_000_000.0), 10_000.0);
    }

    #[test]
    fn pension_allowance_is_non_increasing_above_threshold() {
        let mut previous = pension_annual_allowance(PENSION_TAPER_THRESHOLD);
        let mut income = PENSION_TAPER_THRESHOLD;
        while income < 500_000.0 {
            income += 1_250.0;
            let current = pension_annual_allowance(income);
            assert!(current <= previous, "allowance rose at {income}");
            assert!(current >= MIN_PENSION_ALLOWANCE);
            previous = current;
        }
    }

    #[test]
    fn isa_boundaries_do_not_fire() {
        assert!(isa_opportunity(5_001.0, 10_001.0));
        assert!(!isa_opportunity(5_000.0, 50_000.0));
        assert!(!isa_opportunity(20_000.0, 10_000.0));
    }

    #[test]
    fn cgt_fires_above_eighty_percent() {
        assert!(cgt_exposure(2_500.0));
        assert!(!cgt_exposure(2_300.0));
        assert!(!cgt_exposure(2_400.0));
    }
}
