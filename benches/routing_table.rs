//! Micro-benchmarks for RoutingTable operations: add, closest, and remove
//! at varying table sizes. Reports nanoseconds-per-operation.
//!
//! Run: `cargo bench --bench routing_table`

use devp2p::{AddOutcome, Contact, Endpoint, Id, NodeId, RoutingTable};
use std::net::{IpAddr, Ipv4Addr};
use std::time::Instant;

fn main() {
    println!("routing_table\n");

    bench_add();
    bench_closest();
    bench_remove();
}

fn contacts(n: usize) -> Vec<Contact> {
    let endpoint = Endpoint::new(
        IpAddr::V4(Ipv4Addr::LOCALHOST),
        Some(30303),
        Some(30303),
    );

    (0..n)
        .map(|_| Contact::new(NodeId::random(), endpoint))
        .collect()
}

fn filled(n: usize) -> RoutingTable {
    let mut table = RoutingTable::new(Id::random());
    for contact in contacts(n) {
        table.add(contact);
    }
    table
}

fn bench_add() {
    println!("add");

    let fresh = contacts(1000);

    {
        let mut table = RoutingTable::new(Id::random());
        let mut pings = 0;

        let start = Instant::now();
        for contact in fresh.iter().cloned() {
            if let AddOutcome::Ping { .. } = table.add(contact) {
                pings += 1;
            }
        }
        let per_op = start.elapsed().as_nanos() / fresh.len() as u128;

        println!(
            "empty table:     {per_op}ns/op (final size: {}, full buckets hit: {pings})",
            table.count()
        );
    }

    {
        let mut table = filled(100);

        let start = Instant::now();
        for contact in fresh.iter().cloned() {
            table.add(contact);
        }
        let per_op = start.elapsed().as_nanos() / fresh.len() as u128;

        println!("100 contacts:    {per_op}ns/op");
    }

    {
        let mut table = filled(100);
        let known = table.to_vec();

        let start = Instant::now();
        for contact in known.iter().cloned() {
            table.add(contact.with_clock(1));
        }
        let per_op = start.elapsed().as_nanos() / known.len() as u128;

        println!("updates:         {per_op}ns/op");
    }

    println!();
}

fn bench_closest() {
    println!("closest");

    let targets: Vec<_> = (0..1000).map(|_| Id::random()).collect();

    for size in [20, 100, 400] {
        let table = filled(size);

        let start = Instant::now();
        for target in &targets {
            let _ = table.closest(target, 16);
        }
        let per_op = start.elapsed().as_nanos() / targets.len() as u128;

        println!("{size:>4} contacts:   {per_op}ns/op (table size: {})", table.count());
    }

    println!();
}

fn bench_remove() {
    println!("remove");

    for size in [20, 100, 400] {
        let mut table = filled(size);
        let ids: Vec<_> = table.to_vec().iter().map(|c| *c.id()).collect();

        let start = Instant::now();
        for id in &ids {
            table.remove(id);
        }
        let per_op = start.elapsed().as_nanos() / ids.len().max(1) as u128;

        println!("{size:>4} contacts:   {per_op}ns/op");
    }

    println!();
}
