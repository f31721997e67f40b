use smallvec::SmallVec;

pub type Str = String;
pub type Args = SmallVec<[Str; 4]>;

/// Construct a new `Args` containing the given arguments.
///
/// `args!` acts like the standard library's `vec!` macro, calling
/// `Into::into` on each member so string literals may be passed directly.
#[macro_export]
macro_rules! args [
    ( $($x:expr), *) => ({
        let mut _arr = $crate::types::Args::new();
        $(_arr.push($x.into());)*
        _arr
    })
];
