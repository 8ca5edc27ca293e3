// SPDX-License-Identifier: (MIT OR Apache-2.0)

#[derive(Debug, Clone, Copy)]
pub struct RegistryConfig {
    /// Initial capacity of each category's slot table.
    pub initial_capacity: usize,
    /// Compare handle generations on lookup. With this off, a record left
    /// behind by a previous occupant of a reused handle value still matches.
    pub check_generations: bool,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            initial_capacity: 64,
            check_generations: true,
        }
    }
}
