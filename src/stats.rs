use crate::error::SessionError;

/// Arithmetic mean over the recorded heart rates.
pub fn mean(rates: &[u16]) -> Result<f64, SessionError> {
    if rates.is_empty() {
        return Err(SessionError::InsufficientData {
            needed: 1,
            actual: 0,
        });
    }
    let sum: u64 = rates.iter().map(|&r| u64::from(r)).sum();
    Ok(sum as f64 / rates.len() as f64)
}

/// Mean after excluding the single maximum and single minimum reading.
/// Needs at least 3 samples, otherwise the divisor would be zero or negative.
pub fn trimmed_mean(rates: &[u16]) -> Result<f64, SessionError> {
    if rates.len() < 3 {
        return Err(SessionError::InsufficientData {
            needed: 3,
            actual: rates.len(),
        });
    }

    let mut sum = 0u64;
    let mut min = u16::MAX;
    let mut max = u16::MIN;
    for &rate in rates {
        sum += u64::from(rate);
        min = min.min(rate);
        max = max.max(rate);
    }
    Ok((sum - u64::from(min) - u64::from(max)) as f64 / (rates.len() - 2) as f64)
}
