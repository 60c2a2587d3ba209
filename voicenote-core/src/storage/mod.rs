pub mod m4a_writer;
