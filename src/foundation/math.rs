pub(crate) fn mul_div255_u16(x: u16, y: u16) -> u16 {
    (((u32::from(x) * u32::from(y)) + 127) / 255) as u16
}

/// Web-Mercator latitude limit; tiles do not extend past it.
pub(crate) const MERCATOR_MAX_LAT: f64 = 85.051_128_779_806_6;

#[cfg(test)]
#[path = "../../tests/unit/foundation/math.rs"]
mod tests;
