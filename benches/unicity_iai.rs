#[cfg(target_os = "linux")]
mod bench {
    use iai::black_box;
    use unicity::{variant, Handle, Unicity};

    #[derive(Debug, PartialEq, Eq, Hash)]
    pub struct Zero;

    #[derive(Debug, PartialEq, Eq, Hash)]
    pub struct One;

    #[derive(Debug, PartialEq, Eq, Hash)]
    pub struct Node {
        pub variable: i32,
        pub lo: Handle<SimpleDD>,
        pub hi: Handle<SimpleDD>,
    }

    variant! {
        pub enum SimpleDD { Zero, One, Node }
    }

    fn tower(u: &Unicity<SimpleDD>, n: i32) -> Handle<SimpleDD> {
        let zero = u.make(Zero);
        let mut dd = u.make(One);
        for i in 0..n {
            dd = u.make(Node {
                variable: i,
                lo: dd.clone(),
                hi: zero.clone(),
            });
        }
        dd
    }

    // Build a 256-node chain, then let the drops reclaim everything.
    pub fn unicity_build_drop_256() {
        let u = Unicity::<SimpleDD>::new(512);
        black_box(tower(&u, 256).strong_count());
    }

    // Rebuild an existing chain: all unification hits through the block
    // recycler.
    pub fn unicity_remake_shared_256() {
        let u = Unicity::<SimpleDD>::new(512);
        let kept = tower(&u, 256);
        let again = tower(&u, 256);
        black_box(kept == again);
    }
}

#[cfg(target_os = "linux")]
fn main() {
    let benches: &[&(&'static str, fn())] = &[
        &(
            "unicity_build_drop_256",
            bench::unicity_build_drop_256 as fn(),
        ),
        &(
            "unicity_remake_shared_256",
            bench::unicity_remake_shared_256 as fn(),
        ),
    ];
    iai::runner(benches);
}

#[cfg(not(target_os = "linux"))]
fn main() {
    eprintln!("Skipping: iai benches require Linux/valgrind.");
}
