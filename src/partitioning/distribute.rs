//! Item distribution across split partitions.

use crate::types::Item;

/// Child keys produced by splitting `partition_key` into `parts` pieces.
pub fn split_keys(partition_key: &str, parts: usize) -> Vec<String> {
    (0..parts)
        .map(|i| format!("{}#{}", partition_key, i))
        .collect()
}

/// Deal items round-robin over `targets`, re-keying each one.
///
/// Every item lands in exactly one target and the group sizes differ by at
/// most one. Items keep their sort keys and payloads.
pub fn distribute_items(items: &[Item], targets: &[String]) -> Vec<Vec<Item>> {
    let mut groups: Vec<Vec<Item>> = targets
        .iter()
        .map(|_| Vec::with_capacity(items.len() / targets.len().max(1) + 1))
        .collect();
    if targets.is_empty() {
        return groups;
    }

    for (i, item) in items.iter().enumerate() {
        let slot = i % targets.len();
        groups[slot].push(item.with_partition(targets[slot].as_str()));
    }
    groups
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    fn items(n: usize) -> Vec<Item> {
        (0..n)
            .map(|i| Item::new("USER#2024-03", format!("sk-{:04}", i), vec![i as u8]))
            .collect()
    }

    #[test]
    fn test_split_keys() {
        assert_eq!(
            split_keys("USER#2024-03", 2),
            vec!["USER#2024-03#0", "USER#2024-03#1"]
        );
    }

    #[test]
    fn test_distribute_is_even_and_complete() {
        let source = items(5001);
        let targets = split_keys("USER#2024-03", 2);
        let groups = distribute_items(&source, &targets);

        assert_eq!(groups.len(), 2);
        assert_eq!(groups[0].len(), 2501);
        assert_eq!(groups[1].len(), 2500);

        let sort_keys: HashSet<&str> = groups
            .iter()
            .flatten()
            .map(|i| i.sort_key.as_str())
            .collect();
        assert_eq!(sort_keys.len(), 5001);
        assert!(groups[0].iter().all(|i| i.partition_key == "USER#2024-03#0"));
        assert!(groups[1].iter().all(|i| i.partition_key == "USER#2024-03#1"));
    }

    #[test]
    fn test_distribute_empty_inputs() {
        assert!(distribute_items(&items(3), &[]).is_empty());
        let groups = distribute_items(&[], &split_keys("k", 2));
        assert!(groups.iter().all(Vec::is_empty));
    }
}
