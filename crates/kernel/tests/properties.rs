mod common;

use std::collections::BTreeMap;

use cinder_kernel::{Kernel, KernelError, Pid, Resume, Syscall, TrapFrame};
use common::*;
use proptest::prelude::*;

const HEAP_PAGES: usize = 6;

#[derive(Debug, Clone)]
enum Step {
    Yield,
    Timer,
    PageAlloc(usize),
    Write(usize, u8),
    Fork,
    Exit,
}

fn step() -> impl Strategy<Value = Step> {
    prop_oneof![
        2 => Just(Step::Yield),
        1 => Just(Step::Timer),
        4 => (0..HEAP_PAGES).prop_map(Step::PageAlloc),
        4 => (0..HEAP_PAGES, any::<u8>()).prop_map(|(page, byte)| Step::Write(page, byte)),
        2 => Just(Step::Fork),
        1 => Just(Step::Exit),
    ]
}

/// What each live process should see at the start of each heap page it mapped.
type Model = BTreeMap<Pid, BTreeMap<usize, u8>>;

fn apply(kernel: &mut Kernel, model: &mut Model, step: &Step) {
    let pid = kernel.current().unwrap();
    match *step {
        Step::Yield => {
            call(kernel, Syscall::Yield, 0);
        }
        Step::Timer => {
            let registers = *kernel.process(pid).unwrap().registers();
            kernel.exception(&TrapFrame::timer(registers));
        }
        Step::PageAlloc(page) => {
            match call_value(kernel, Syscall::PageAlloc, heap(page).as_u64()) {
                0 => {
                    model.get_mut(&pid).unwrap().insert(page, 0);
                }
                error => assert_eq!(error, KernelError::OutOfMemory.errno()),
            }
        }
        Step::Write(page, byte) => {
            if !model[&pid].contains_key(&page) {
                return;
            }
            if write(kernel, heap(page), &[byte]) {
                model.get_mut(&pid).unwrap().insert(page, byte);
            } else {
                // No page was left for the private copy.
                model.remove(&pid);
            }
        }
        Step::Fork => {
            let result = call_value(kernel, Syscall::Fork, 0);
            if result > 0 {
                let pages = model[&pid].clone();
                model.insert(Pid::new(result as usize), pages);
            } else {
                assert!(
                    result == KernelError::TableFull.errno()
                        || result == KernelError::OutOfMemory.errno()
                );
            }
        }
        Step::Exit => {
            call(kernel, Syscall::Exit, 0);
            model.remove(&pid);
        }
    }
}

fn check(kernel: &Kernel, model: &Model) {
    assert_eq!(kernel.audit(), Ok(()));
    for (&pid, pages) in model {
        assert!(is_runnable(kernel, pid), "process {pid} should be runnable");
        for (&page, &byte) in pages {
            assert_eq!(read_byte(kernel, pid, heap(page)), byte, "process {pid} page {page}");
        }
    }
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn refcounts_and_isolation_hold(steps in prop::collection::vec(step(), 1..80)) {
        let mut kernel = booted(2);
        let mut model = Model::new();
        model.insert(Pid::new(1), BTreeMap::new());
        model.insert(Pid::new(2), BTreeMap::new());

        for step in &steps {
            if kernel.current().is_none() {
                prop_assert_eq!(kernel.idle(), Resume::Idle);
                break;
            }
            apply(&mut kernel, &mut model, step);
            check(&kernel, &model);
        }
    }
}
