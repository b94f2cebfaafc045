//! Walkthrough of the table API.
//!
//! Run with `RUST_LOG=info cargo run --example table_walkthrough`.

use disktable::{Dimension, Table, TableIterator, TableOptions, TtlType};
use std::collections::BTreeMap;

fn main() -> Result<(), disktable::Error> {
    env_logger::init();

    let root = std::env::temp_dir().join("disktable-walkthrough");
    let mapping = BTreeMap::from([("card".to_string(), 0), ("merchant".to_string(), 1)]);
    let table = Table::new("payments", 1, 0, mapping, 2, TtlType::LatestTime, TableOptions::new(&root));
    table.init()?;
    table.set_schema(b"card:string,merchant:string,amount:int".to_vec())?;

    for (ts, card, merchant, amount) in [
        (100, "card-1", "coffee", "3"),
        (200, "card-1", "books", "25"),
        (300, "card-2", "coffee", "4"),
        (400, "card-1", "coffee", "3"),
    ] {
        table.put_dimensions(
            ts,
            amount.as_bytes(),
            &[Dimension::new("card", card), Dimension::new("merchant", merchant)],
        )?;
    }

    println!("All versions of card-1:");
    let mut it = table.new_iterator(b"card-1")?;
    it.seek_to_first();
    while it.valid() {
        println!("  ts={} amount={}", it.key(), String::from_utf8_lossy(it.value()));
        it.next();
    }

    println!("Latest {} payments per merchant:", table.ttl());
    let mut it = table.new_traverse_iterator(1)?;
    it.seek_to_first();
    while it.valid() {
        println!("  {} ts={}", String::from_utf8_lossy(it.pk()), it.key());
        it.next();
    }
    it.status()?;

    println!("Exact lookup: {:?}", table.get_from(1, b"books", 200)?);
    println!("Approximate records: {}", table.record_cnt());

    table.delete(b"card-2", 0)?;
    table.self_tune();
    table.destroy()?;
    Ok(())
}
