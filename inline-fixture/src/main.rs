// Rust test fixture: forced-inline and non-inlined call sites for inline-frame attribution.
// Expected inline chains (outermost first):
//   main → spin                    (physical frame: main)
//   main → inlined_spin → spin     (physical frame: main)
//   outlined_spin → spin           (physical frames: main, outlined_spin)
//
// Build:
//   cargo build --release -p inline-fixture
//   rustc --crate-name inline_fixture -C opt-level=3 -C debuginfo=2 -o inline-fixture main.rs

const N: u64 = 10_000_000;

#[inline(always)]
fn spin(n: u64) {
    let mut sink = 0u8;
    for _ in 0..n {
        // SAFETY: `sink` is a live, aligned local.
        unsafe {
            let v = core::ptr::read_volatile(&sink);
            core::ptr::write_volatile(&mut sink, v.wrapping_add(1));
        }
    }
}

#[inline(always)]
fn inlined_spin() {
    spin(N);
}

#[inline(never)]
fn outlined_spin() {
    spin(N);
}

// Keeps the entry as its own frame instead of folding into the runtime's start shim.
#[inline(never)]
fn main() {
    spin(N);
    inlined_spin();
    outlined_spin();
    // Keeps the call out of tail position so main stays on the stack.
    core::hint::black_box(());
}
