/// Build `Tags` from `key => value` pairs.
///
/// ```
/// let tags = event::tags!("command" => "get", "database" => "db0");
/// assert_eq!(tags.len(), 2);
/// ```
#[macro_export]
macro_rules! tags {
    ( $($x:expr => $y:expr),* ) => ({
        let mut _tags = $crate::tags::Tags::new();
        $(
            _tags.insert($x, $y);
        )*
        _tags
    });
    ( $($x:expr => $y:expr,)* ) => (
        $crate::tags!{$($x => $y),*}
    );
}
