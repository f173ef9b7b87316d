//! Property-based tests for paginated reads and writes
//!
//! These tests verify that:
//! - A select over M rows with page size N yields ceil(M / N) pages
//! - Concatenating the pages reproduces the unpaged select in order
//! - Write pagination stores every record exactly once

#[cfg(test)]
mod tests {
    use proptest::prelude::*;
    use sqlmate::{Authorization, BlockingClient, Client, Filter, Record, SelectOptions, Value};
    use tempfile::TempDir;

    // Test infrastructure

    fn blocking_client(dir: &TempDir) -> BlockingClient {
        let conn = rusqlite::Connection::open(dir.path().join("main.sqlite3")).unwrap();
        conn.execute_batch("CREATE TABLE items (id INTEGER PRIMARY KEY, label TEXT NOT NULL, weight INTEGER)")
            .unwrap();
        BlockingClient::new(Client::new(Authorization::sqlite(dir.path(), "main"))).unwrap()
    }

    fn item(i: usize) -> Record {
        let mut record = Record::new();
        record.insert("label".to_string(), Value::Text(format!("item-{:04}", i)));
        record.insert("weight".to_string(), Value::Int((i % 7) as i64));
        record
    }

    fn ordered() -> SelectOptions {
        SelectOptions::new().order_by("id")
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(24))]

        #[test]
        fn prop_select_pages_cover_all_rows(rows in 0usize..60, page_size in 1usize..15) {
            let dir = TempDir::new().unwrap();
            let client = blocking_client(&dir);
            if rows > 0 {
                client.insert("main", "items", (0..rows).map(item).collect()).unwrap();
            }

            let pages: Vec<_> = client
                .select_pages("main", "items", Filter::new(), ordered(), page_size)
                .collect::<Result<Vec<_>, _>>()
                .unwrap();

            prop_assert_eq!(pages.len(), (rows + page_size - 1) / page_size);
            prop_assert!(pages.iter().all(|p| !p.is_empty() && p.len() <= page_size));

            let paged: Vec<Value> = pages.into_iter().flatten().map(|r| r["label"].clone()).collect();
            let unpaged: Vec<Value> = client
                .select("main", "items", &Filter::new(), &ordered())
                .unwrap()
                .iter()
                .map(|r| r["label"].clone())
                .collect();
            prop_assert_eq!(paged, unpaged);
        }

        #[test]
        fn prop_insert_pages_store_every_record(records in 1usize..80, page_size in 1usize..20) {
            let dir = TempDir::new().unwrap();
            let client = blocking_client(&dir);

            let responses = client
                .insert_pages("main", "items", (0..records).map(item).collect(), page_size)
                .collect::<Result<Vec<_>, _>>()
                .unwrap();
            prop_assert_eq!(responses.len(), (records + page_size - 1) / page_size);
            let affected: u64 = responses.iter().map(|r| r.rows_affected).sum();
            prop_assert_eq!(affected, records as u64);

            let stored = client.select("main", "items", &Filter::new(), &ordered()).unwrap();
            let labels: Vec<String> = stored
                .iter()
                .map(|r| r["label"].as_str().unwrap().to_string())
                .collect();
            let expected: Vec<String> = (0..records).map(|i| format!("item-{:04}", i)).collect();
            prop_assert_eq!(labels, expected);
        }

        #[test]
        fn prop_filtered_pages_match_filtered_select(rows in 1usize..50, page_size in 1usize..10, weight in 0i64..7) {
            let dir = TempDir::new().unwrap();
            let client = blocking_client(&dir);
            client.insert("main", "items", (0..rows).map(item).collect()).unwrap();
            let filter = Filter::new().with("weight", weight);

            let paged = client
                .select_pages("main", "items", filter.clone(), ordered(), page_size)
                .collect::<Result<Vec<_>, _>>()
                .unwrap()
                .into_iter()
                .flatten()
                .count();
            let direct = client.select("main", "items", &filter, &ordered()).unwrap().len();
            prop_assert_eq!(paged, direct);
        }
    }
}
