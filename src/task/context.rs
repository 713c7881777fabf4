use core::arch::global_asm;
use x86_64::VirtAddr;

use crate::error::{Error, Result};
use crate::stack::Stack;

// Room for the zeroed return slot plus the entry function's first frame
const MIN_FRAME: u64 = 64;

// Bit 1 of RFLAGS always reads as set; every other flag starts clear
const INITIAL_RFLAGS: u64 = 1 << 1;

#[derive(Debug, Default, Clone, Copy)]
#[repr(C)]
pub struct TaskContext {
    // Preserved registers in the System V AMD64 ABI
    pub r15: u64,
    pub r14: u64,
    pub r13: u64,
    pub r12: u64,
    pub rbx: u64,
    pub rbp: u64,

    // Special registers
    pub rip: u64,    // Where the flow resumes
    pub rflags: u64, // CPU flags
    pub rsp: u64,    // Stack pointer
}

// Field offsets above are baked into the routine below
global_asm!(
    ".pushsection .text.uthread_context_switch,\"ax\",@progbits",
    ".global uthread_context_switch",
    ".p2align 4",
    "uthread_context_switch:",
    // Save the current context
    "    mov [rdi + 0x00], r15",
    "    mov [rdi + 0x08], r14",
    "    mov [rdi + 0x10], r13",
    "    mov [rdi + 0x18], r12",
    "    mov [rdi + 0x20], rbx",
    "    mov [rdi + 0x28], rbp",
    // Resume point: the `ret` back into the caller of the switch
    "    lea rax, [rip + .Luthread_context_resume]",
    "    mov [rdi + 0x30], rax",
    "    pushfq",
    "    pop qword ptr [rdi + 0x38]",
    // RSP still points at our return address
    "    mov [rdi + 0x40], rsp",
    // Load the next context
    "    mov r15, [rsi + 0x00]",
    "    mov r14, [rsi + 0x08]",
    "    mov r13, [rsi + 0x10]",
    "    mov r12, [rsi + 0x18]",
    "    mov rbx, [rsi + 0x20]",
    "    mov rbp, [rsi + 0x28]",
    "    push qword ptr [rsi + 0x38]",
    "    popfq",
    "    mov rsp, [rsi + 0x40]",
    "    jmp qword ptr [rsi + 0x30]",
    ".Luthread_context_resume:",
    "    ret",
    ".popsection",
);

unsafe extern "C" {
    fn uthread_context_switch(current: *mut TaskContext, next: *const TaskContext);
}

impl TaskContext {
    /// Initialize a context that starts executing `entry_point` on `stack`
    /// the first time it is switched into.
    pub fn init(&mut self, entry_point: extern "C" fn() -> !, stack: &Stack) -> Result<()> {
        let stack_top = stack.top().align_down(16u64);
        if stack_top < stack.bottom() + MIN_FRAME {
            return Err(Error::AllocationError("stack too small for an initial frame"));
        }

        // Looks like a function entry: RSP % 16 == 8, with a null return
        // address so unwinders stop here
        let rsp: VirtAddr = stack_top - 8u64;
        unsafe {
            rsp.as_mut_ptr::<u64>().write(0);
        }

        *self = TaskContext::default();
        self.rip = entry_point as usize as u64;
        self.rsp = rsp.as_u64();
        self.rflags = INITIAL_RFLAGS;
        Ok(())
    }

    /// Save the running flow into `current` and resume `next`.
    ///
    /// Returns only when some later switch resumes `current`.
    ///
    /// # Safety
    ///
    /// `next` must hold a context saved by this routine or prepared by
    /// [`TaskContext::init`] whose stack is still mapped, and nothing may be
    /// executing on that stack.
    pub unsafe fn switch(current: *mut TaskContext, next: *const TaskContext) {
        unsafe { uthread_context_switch(current, next) }
    }
}
