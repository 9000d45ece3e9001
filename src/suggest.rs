/// Furthest edit distance still considered a typo.
const MAX_DISTANCE: usize = 2;

/// Suggest the intended word for a misspelled `name`.
///
/// An exact substring match (either way round, case insensitive) wins. Otherwise the
/// candidate with the smallest Levenshtein distance, up to [`MAX_DISTANCE`]. Ties go to the
/// earliest candidate.
pub fn suggest<'a>(name: &str, candidates: impl IntoIterator<Item = &'a str>) -> Option<&'a str> {
    let name = name.to_ascii_uppercase();
    let candidates: Vec<&str> = candidates.into_iter().collect();

    // Very short names are substrings of far too much
    if name.trim_start_matches('.').len() >= 2 {
        let substring = candidates.iter().find(|candidate| {
            let candidate = candidate.to_ascii_uppercase();
            candidate.contains(&name) || name.contains(&candidate)
        });
        if let Some(candidate) = substring {
            return Some(*candidate);
        }
    }

    candidates
        .iter()
        .map(|candidate| (levenshtein(&name, &candidate.to_ascii_uppercase()), *candidate))
        .filter(|(distance, _)| *distance <= MAX_DISTANCE)
        .min_by_key(|(distance, _)| *distance)
        .map(|(_, candidate)| candidate)
}

/// Edit distance between two strings, counting chars.
pub fn levenshtein(a: &str, b: &str) -> usize {
    let b: Vec<char> = b.chars().collect();
    let mut previous: Vec<usize> = (0..=b.len()).collect();
    let mut current = vec![0; b.len() + 1];

    for (i, ca) in a.chars().enumerate() {
        current[0] = i + 1;
        for (j, cb) in b.iter().enumerate() {
            let substitution = previous[j] + usize::from(ca != *cb);
            current[j + 1] = substitution
                .min(previous[j + 1] + 1)
                .min(current[j] + 1);
        }
        std::mem::swap(&mut previous, &mut current);
    }
    previous[b.len()]
}
