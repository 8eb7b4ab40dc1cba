// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use std::time::Duration;

use crate::error::CatalogError;

/// Parse an ISO-8601 duration as reported by the catalog (`PT1H2M3S`, `P1DT2H`)
///
/// Years and months are not supported since video lengths never use them.
pub fn parse_iso8601_duration(value: &str) -> Result<Duration, CatalogError> {
    let invalid = || CatalogError::InvalidDuration(value.to_string());

    let body = value.strip_prefix('P').ok_or_else(invalid)?;
    if body.is_empty() {
        return Err(invalid());
    }

    let mut secs = 0f64;
    let mut in_time = false;
    let mut number = String::new();

    for c in body.chars() {
        match c {
            'T' if !in_time && number.is_empty() => in_time = true,
            '0'..='9' | '.' => number.push(c),
            unit => {
                let amount: f64 = number.parse().map_err(|_| invalid())?;
                number.clear();
                let multiplier = match (in_time, unit) {
                    (false, 'W') => 7.0 * 86_400.0,
                    (false, 'D') => 86_400.0,
                    (true, 'H') => 3_600.0,
                    (true, 'M') => 60.0,
                    (true, 'S') => 1.0,
                    _ => return Err(invalid()),
                };
                secs += amount * multiplier;
            }
        }
    }

    if !number.is_empty() {
        return Err(invalid());
    }

    Duration::try_from_secs_f64(secs).map_err(|_| invalid())
}
