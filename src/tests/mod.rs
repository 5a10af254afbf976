//! Tests that run the chat client against a live broker over real sockets.
