//! Five-star popularity ranking by download count.

/// Number of popularity stars.
pub const STARS: usize = 5;

/// Download thresholds for each star, lowest star first.
///
/// Books are ranked by downloads, descending; the ranking is cut into five
/// roughly equal slices, each boundary falling on a change in download count
/// so that books with equal downloads always share a star rating.
pub fn star_limits(downloads: &[u32]) -> [u32; STARS] {
    let mut sorted = downloads.to_vec();
    sorted.sort_unstable_by(|a, b| b.cmp(a));

    let mut limits = [0u32; STARS];
    let Some(&first) = sorted.first() else {
        return limits;
    };

    let count = sorted.len() as f64;
    let mut stars = STARS;
    let mut previous = first;
    for (rank, &current) in sorted.iter().enumerate() {
        let boundary = (STARS - stars + 1) as f64 / STARS as f64 * count;
        if stars > 1 && rank as f64 > boundary && current < previous {
            limits[stars - 1] = previous;
            stars -= 1;
        }
        previous = current;
    }
    limits
}

/// Stars earned by a book with `downloads`.
pub fn stars_for(downloads: u32, limits: &[u32; STARS]) -> u8 {
    limits.iter().filter(|&&limit| downloads >= limit).count() as u8
}
