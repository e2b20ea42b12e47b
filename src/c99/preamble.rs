//! Fixed preamble for every emitted translation unit.

/// Headers, the syscall helpers and the error-union conventions. Emitted
/// code assumes nothing beyond these headers plus the helpers defined here;
/// the `uya_main` entry point is called by the runtime's `main`.
pub const PREAMBLE: &str = r#"/* generated by uya-lang; do not edit */
#include <stdint.h>
#include <stdbool.h>
#include <stddef.h>
#include <stdarg.h>
#include <stdio.h>
#include <string.h>

/* raw syscall helpers; a negative return carries -errno */
#if defined(__x86_64__)
static inline long uya_syscall0(long n) {
    long ret;
    __asm__ volatile ("syscall" : "=a"(ret) : "a"(n) : "rcx", "r11", "memory");
    return ret;
}
static inline long uya_syscall1(long n, long a1) {
    long ret;
    __asm__ volatile ("syscall" : "=a"(ret) : "a"(n), "D"(a1) : "rcx", "r11", "memory");
    return ret;
}
static inline long uya_syscall2(long n, long a1, long a2) {
    long ret;
    __asm__ volatile ("syscall" : "=a"(ret) : "a"(n), "D"(a1), "S"(a2) : "rcx", "r11", "memory");
    return ret;
}
static inline long uya_syscall3(long n, long a1, long a2, long a3) {
    long ret;
    __asm__ volatile ("syscall" : "=a"(ret) : "a"(n), "D"(a1), "S"(a2), "d"(a3) : "rcx", "r11", "memory");
    return ret;
}
static inline long uya_syscall4(long n, long a1, long a2, long a3, long a4) {
    long ret;
    register long r10 __asm__("r10") = a4;
    __asm__ volatile ("syscall" : "=a"(ret) : "a"(n), "D"(a1), "S"(a2), "d"(a3), "r"(r10) : "rcx", "r11", "memory");
    return ret;
}
static inline long uya_syscall5(long n, long a1, long a2, long a3, long a4, long a5) {
    long ret;
    register long r10 __asm__("r10") = a4;
    register long r8 __asm__("r8") = a5;
    __asm__ volatile ("syscall" : "=a"(ret) : "a"(n), "D"(a1), "S"(a2), "d"(a3), "r"(r10), "r"(r8) : "rcx", "r11", "memory");
    return ret;
}
static inline long uya_syscall6(long n, long a1, long a2, long a3, long a4, long a5, long a6) {
    long ret;
    register long r10 __asm__("r10") = a4;
    register long r8 __asm__("r8") = a5;
    register long r9 __asm__("r9") = a6;
    __asm__ volatile ("syscall" : "=a"(ret) : "a"(n), "D"(a1), "S"(a2), "d"(a3), "r"(r10), "r"(r8), "r"(r9) : "rcx", "r11", "memory");
    return ret;
}
#else
static inline long uya_syscall0(long n) { (void)n; return -38; }
static inline long uya_syscall1(long n, long a1) { (void)n; (void)a1; return -38; }
static inline long uya_syscall2(long n, long a1, long a2) { (void)n; (void)a1; (void)a2; return -38; }
static inline long uya_syscall3(long n, long a1, long a2, long a3) { (void)n; (void)a1; (void)a2; (void)a3; return -38; }
static inline long uya_syscall4(long n, long a1, long a2, long a3, long a4) { (void)n; (void)a1; (void)a2; (void)a3; (void)a4; return -38; }
static inline long uya_syscall5(long n, long a1, long a2, long a3, long a4, long a5) { (void)n; (void)a1; (void)a2; (void)a3; (void)a4; (void)a5; return -38; }
static inline long uya_syscall6(long n, long a1, long a2, long a3, long a4, long a5, long a6) { (void)n; (void)a1; (void)a2; (void)a3; (void)a4; (void)a5; (void)a6; return -38; }
#endif

/* error unions are { uint32_t error_id; T value; }; error_id 0 is success */
typedef struct { uint32_t error_id; } UyaErr_void;
typedef struct { uint32_t error_id; int32_t value; } UyaErr_i32;
typedef struct { uint32_t error_id; int64_t value; } UyaErr_i64;
"#;
