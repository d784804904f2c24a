//! Org stack (`spec.md` §3/§4.5.4): `pushorg`/`poporg` lets a block of the
//! program assemble as if it lived at a different origin, then return to
//! where it left off plus the size of the relocated block.

#[derive(Clone, Copy, Debug)]
struct OrgEntry {
    saved_location: u32,
    /// Location of the first line assembled after the `pushorg` — the origin
    /// the block was relocated to (`spec.md`'s `first_relocated_line`, in
    /// location terms rather than line-index terms: since locations are
    /// contiguous within a relocated span, the two are equivalent).
    relocated_origin: u32,
}

pub struct OrgStack(Vec<OrgEntry>);

impl OrgStack {
    pub fn new() -> Self {
        OrgStack(Vec::new())
    }

    pub fn push(&mut self, saved_location: u32, relocated_origin: u32) {
        self.0.push(OrgEntry {
            saved_location,
            relocated_origin,
        });
    }

    /// Pop the stack, returning the location assembly should resume at:
    /// the saved origin plus the byte-size of the block that was relocated.
    pub fn pop(&mut self, current_location: u32) -> Result<u32, String> {
        let entry = self.0.pop().ok_or_else(|| "poporg with no matching pushorg".to_string())?;
        let relocated_size = current_location.saturating_sub(entry.relocated_origin);
        Ok(entry.saved_location + relocated_size)
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn pushorg_then_poporg_restores_plus_relocated_size() {
        let mut stack = OrgStack::new();
        stack.push(1, 0x8000);
        let resumed = stack.pop(0x8003).unwrap();
        assert_eq!(resumed, 4);
    }

    #[test]
    fn poporg_without_push_is_an_error() {
        let mut stack = OrgStack::new();
        assert!(stack.pop(0).is_err());
    }
}
