//! Fixed unit-conversion table.
//!
//! Conversions are applied before factor multiplication, never after. The
//! table is versioned so a calculated record can state which vintage of
//! conversions produced it. Anything not listed here is an unconvertible
//! mismatch and must fail, not default.

use rust_decimal::Decimal;

/// Version tag recorded alongside calculations that used a conversion
pub const CONVERSION_TABLE_VERSION: &str = "2024.1";

/// Multiplier converting a quantity in `from` into `to`.
///
/// Returns `Decimal::ONE` for identical units (case-insensitive) and `None`
/// when no conversion path exists.
pub fn multiplier(from: &str, to: &str) -> Option<Decimal> {
    let from = normalize(from);
    let to = normalize(to);

    if from == to {
        return Some(Decimal::ONE);
    }

    let value = match (from.as_str(), to.as_str()) {
        // Energy (base: kWh)
        ("mwh", "kwh") => Decimal::new(1_000, 0),
        ("gwh", "kwh") => Decimal::new(1_000_000, 0),
        ("mj", "kwh") => Decimal::new(2_777_778, 7),
        ("gj", "kwh") => Decimal::new(27_778, 2),
        ("kwh", "mwh") => Decimal::new(1, 3),
        // Natural gas volume to energy, HHV grid average
        ("m3", "kwh") => Decimal::new(1_055, 2),
        // Mass (base: kg)
        ("t", "kg") => Decimal::new(1_000, 0),
        ("g", "kg") => Decimal::new(1, 3),
        ("kg", "t") => Decimal::new(1, 3),
        // Distance (base: km)
        ("miles", "km") => Decimal::new(160_934, 5),
        ("miles", "passenger-km") => Decimal::new(160_934, 5),
        ("km", "passenger-km") => Decimal::ONE,
        // Volume (base: liters)
        ("gallons", "liters") => Decimal::new(378_541, 5),
        _ => return None,
    };

    Some(value)
}

/// True when the two units are identical or a conversion path exists
pub fn convertible(from: &str, to: &str) -> bool {
    multiplier(from, to).is_some()
}

fn normalize(unit: &str) -> String {
    let unit = unit.trim().to_lowercase();
    match unit.as_str() {
        "m³" | "cubic meters" => "m3".to_string(),
        "tonnes" | "tonne" => "t".to_string(),
        "l" | "litres" => "liters".to_string(),
        "mile" => "miles".to_string(),
        _ => unit,
    }
}
