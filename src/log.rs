/* Copyright (C) 2022 Antmicro
 *
 * Licensed under the Apache License, Version 2.0 (the "License");
 * you may not use this file except in compliance with the License.
 * You may obtain a copy of the License at
 *
 *     https://www.apache.org/licenses/LICENSE-2.0
 *
 * Unless required by applicable law or agreed to in writing, software
 * distributed under the License is distributed on an "AS IS" BASIS,
 * WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
 * See the License for the specific language governing permissions and
 * limitations under the License.
 */

fn env_level(var: &str) -> usize {
    match std::env::var(var) {
        Ok(lvl) => lvl.trim().parse::<usize>().unwrap_or(0),
        Err(_) => 0,
    }
}

lazy_static! {
    pub static ref DBG_LOG_LEVEL: usize = env_level("FPGAFLOW_LOG_LEVEL");
    pub static ref DBG_PRINT_CODE_INFO: usize = env_level("FPGAFLOW_PRINT_CODE_INFO");
}

pub const DBG_CRITICAL: usize = 0;
pub const DBG_WARN: usize = 1;
pub const DBG_INFO: usize = 2;
pub const DBG_EXTRA: usize = 3;

pub const LOG_LVL_STR: &'static [&'static str] = &[
    /* 0 */ "CRITICAL",
    /* 1 */ "WARNING",
    /* 2 */ "INFO",
    /* 3 */ "EXTRA INFO"
];

#[cfg(debug_assertions)]
#[macro_export]
macro_rules! dbg_log {
    ($lvl:expr, $fmt:literal $(, $v:expr )* $(,)?) => {{
        let lvl = ($crate::log::LOG_LVL_STR.len() - 1).min($lvl);
        if *$crate::log::DBG_LOG_LEVEL >= lvl {
            if *$crate::log::DBG_PRINT_CODE_INFO != 0 {
                dbg!(
                    format!(concat!("{}: ", $fmt), $crate::log::LOG_LVL_STR[lvl] $(, &$v )*)
                );
            } else {
                eprintln!(
                    concat!("{}: ", $fmt),
                    $crate::log::LOG_LVL_STR[lvl] $(, &$v )*
                );
            }
        }
    }};
}

#[cfg(not(debug_assertions))]
#[macro_export]
macro_rules! dbg_log {
    ($lvl:expr, $fmt:literal $(, $v:expr )* $(,)?) => {{
        /* NOP */
        let _ = $lvl;
        $( let _ = &$v; )*
    }};
}
